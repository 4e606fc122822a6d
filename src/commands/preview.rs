use anyhow::{Context, Result};
use skygen::fits::{FitsStore, ImageStore};
use skygen::preview::render_preview;
use skygen::stats::{missing_count, nan_median};
use std::path::{Path, PathBuf};

pub fn preview_sky(
    fits_path: &Path,
    output: Option<PathBuf>,
    vmin: Option<f64>,
    vmax: Option<f64>,
) -> Result<()> {
    println!("Loading FITS file: {}", fits_path.display());
    let frame = FitsStore
        .load(fits_path)
        .with_context(|| format!("Failed to load FITS file: {}", fits_path.display()))?;

    let (rows, columns) = frame.shape();
    println!("Image dimensions: {}x{}", columns, rows);
    println!("  Median: {:.4}", nan_median(&frame.samples));
    println!("  Missing: {}", missing_count(&frame.samples));

    let output_path = match output {
        Some(path) => path,
        None => {
            let mut path = fits_path.to_path_buf();
            path.set_extension("png");
            path
        }
    };

    let range = vmin.zip(vmax);
    let (low, high) = render_preview(&frame.samples, range, &output_path)
        .with_context(|| format!("Failed to save PNG to: {}", output_path.display()))?;

    println!("Display range: {:.4} - {:.4}", low, high);
    println!("Saved preview to: {}", output_path.display());
    Ok(())
}
