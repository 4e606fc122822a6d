use clap::{Parser, Subcommand, ValueEnum};
use skygen::repair::RepairStrategy;
use skygen::sky::SkyConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skygen")]
#[command(about = "Build sky background models from stacks of detector frames", long_about = None)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate one sky model from a directory of frames
    Generate {
        /// Directory holding the input frames
        #[arg(long)]
        in_path: Option<PathBuf>,

        /// Directory the sky model is written to
        #[arg(long)]
        sky_path: Option<PathBuf>,

        /// JSON file with sky settings; command line flags override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also write a PNG preview of the sky model
        #[arg(long)]
        preview: Option<PathBuf>,

        #[command(flatten)]
        sky_options: SkyOptions,
    },

    /// Generate sky models for several detectors of one observation concurrently
    Detectors {
        /// Observation directory holding one C<n> directory per detector
        #[arg(long)]
        parent: PathBuf,

        /// Detectors to process (default: every detector in the clipping table)
        #[arg(long, value_delimiter = ',')]
        chips: Option<Vec<u8>>,

        /// Use flat-fielded frames instead of registered ramps
        #[arg(long)]
        flat: bool,

        /// Input directory under each detector (default: astrom, or flat with --flat)
        #[arg(long)]
        input_subdir: Option<String>,

        /// Output directory under each detector
        #[arg(long, default_value = "sky")]
        output_subdir: String,
    },

    /// Render a FITS image to a grayscale PNG
    Preview {
        /// FITS file to render
        fits_path: PathBuf,

        /// Output PNG (default: input with a .png extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Value rendered black
        #[arg(long, requires = "vmax")]
        vmin: Option<f64>,

        /// Value rendered white
        #[arg(long, requires = "vmin")]
        vmax: Option<f64>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Median,
    Mean,
}

#[derive(Parser, Debug, Clone)]
pub struct SkyOptions {
    /// Frames are flat-fielded (.flat.fits) rather than registered ramps (.ramp.new)
    #[arg(long)]
    pub flat: bool,

    /// Sigma clipping threshold in standard deviations
    #[arg(long)]
    pub sigma: Option<f64>,

    /// Number of frames combined per group (default: all frames in one group)
    #[arg(long)]
    pub group_size: Option<usize>,

    /// Missing percentage at or above which the repair filter runs
    #[arg(long)]
    pub nan_threshold: Option<f64>,

    /// Repair filter for missing samples
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Median window size or mean disk radius, in pixels
    #[arg(long)]
    pub filter_size: Option<usize>,

    /// Earlier sky model to clip residuals against
    #[arg(long)]
    pub prior_sky: Option<PathBuf>,
}

impl SkyOptions {
    /// Overlay the flags that were given onto `config`
    pub fn apply_to(&self, config: &mut SkyConfig) {
        if let Some(sigma) = self.sigma {
            config.sigma = Some(sigma);
        }
        if let Some(group_size) = self.group_size {
            config.group_size = Some(group_size);
        }
        if let Some(threshold) = self.nan_threshold {
            config.nan_threshold = threshold;
        }
        if let Some(strategy) = self.strategy {
            config.repair = match strategy {
                StrategyArg::Median => RepairStrategy::local_median(),
                StrategyArg::Mean => RepairStrategy::local_mean(),
            };
        }
        if let Some(extent) = self.filter_size {
            config.repair = config.repair.with_extent(extent);
        }
        if let Some(prior) = &self.prior_sky {
            config.prior_sky = Some(prior.clone());
        }
    }
}
