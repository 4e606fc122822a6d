use anyhow::{Context, Result};
use skygen::fits::{FitsStore, ImageStore};
use skygen::preview::render_preview;
use skygen::selection::FrameKind;
use skygen::sky::{generate_sky, SkyConfig};
use std::path::PathBuf;

use crate::cli::SkyOptions;

pub fn generate_sky_model(
    in_path: Option<PathBuf>,
    sky_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    preview: Option<PathBuf>,
    options: &SkyOptions,
) -> Result<()> {
    let kind = if options.flat {
        FrameKind::Flat
    } else {
        FrameKind::Registered
    };

    let mut config = match &config_path {
        Some(path) => {
            println!("Loading sky settings: {}", path.display());
            // --flat also switches the threshold and strategy defaults
            SkyConfig::from_json_file_with_kind(path, options.flat.then_some(FrameKind::Flat))
                .with_context(|| format!("Failed to read sky settings: {}", path.display()))?
        }
        None => SkyConfig::for_kind(kind, PathBuf::new(), PathBuf::new()),
    };
    if let Some(dir) = in_path {
        config.source_dir = dir;
    }
    if let Some(dir) = sky_path {
        config.output_dir = dir;
    }
    options.apply_to(&mut config);

    if config.source_dir.as_os_str().is_empty() || config.output_dir.as_os_str().is_empty() {
        anyhow::bail!("Both an input directory (--in-path) and a sky directory (--sky-path) are required");
    }

    println!("Input frames: {}/*{}", config.source_dir.display(), config.kind.suffix());
    println!("Sky directory: {}", config.output_dir.display());
    match config.sigma {
        Some(sigma) => println!("Sigma clipping: {:.1}", sigma),
        None => println!("Sigma clipping: disabled"),
    }
    println!(
        "Repair: {} above {:.1}% missing",
        config.repair.name(),
        config.nan_threshold
    );

    let store = FitsStore;
    let run = generate_sky(&store, &config)
        .with_context(|| format!("Failed to generate sky from {}", config.source_dir.display()))?;

    println!();
    println!("Frames combined: {} in {} group(s)", run.frame_count, run.group_count);
    println!(
        "Missing samples: {} ({:.2}%)",
        run.repair.missing_before, run.repair.missing_percent
    );
    if let Some(strategy) = run.repair.strategy_applied {
        println!("  Filled by {}: {}", strategy.name(), run.repair.filled_by_strategy);
    }
    if run.repair.filled_by_cleanup > 0 {
        println!(
            "  Filled with median {:.4}: {}",
            run.repair.median, run.repair.filled_by_cleanup
        );
    }
    println!("Saved sky model to: {}", run.output_path.display());

    if let Some(png_path) = preview {
        let frame = store
            .load(&run.output_path)
            .with_context(|| format!("Failed to reload sky model: {}", run.output_path.display()))?;
        let (low, high) = render_preview(&frame.samples, None, &png_path)
            .with_context(|| format!("Failed to save PNG to: {}", png_path.display()))?;
        println!("Saved preview ({:.4} - {:.4}) to: {}", low, high, png_path.display());
    }

    Ok(())
}
