pub mod combine;
pub mod detectors;
pub mod driver;
pub mod error;
pub mod fits;
pub mod naming;
pub mod preview;
pub mod repair;
pub mod selection;
pub mod sky;
pub mod stats;

#[cfg(test)]
mod test_sky_generation;

// Re-export commonly used items
pub use detectors::DetectorTable;
pub use error::{Result, SkyError};
pub use fits::{FitsStore, ImageStore};
pub use repair::RepairStrategy;
pub use selection::FrameKind;
pub use sky::{generate_sky, SkyConfig, SkyRun};
