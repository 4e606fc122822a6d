pub mod detectors;
pub mod generate;
pub mod preview;

pub use detectors::generate_detector_skies;
pub use generate::generate_sky_model;
pub use preview::preview_sky;
