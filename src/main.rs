mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Generate {
            in_path,
            sky_path,
            config,
            preview,
            sky_options,
        } => {
            commands::generate_sky_model(in_path, sky_path, config, preview, &sky_options)?;
        }
        Commands::Detectors {
            parent,
            chips,
            flat,
            input_subdir,
            output_subdir,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::generate_detector_skies(
                parent,
                chips,
                flat,
                input_subdir,
                output_subdir,
            ))?;
        }
        Commands::Preview {
            fits_path,
            output,
            vmin,
            vmax,
        } => {
            commands::preview_sky(&fits_path, output, vmin, vmax)?;
        }
    }

    Ok(())
}
