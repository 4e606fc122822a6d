use crate::error::{Result, SkyError};
use image::{ImageBuffer, Luma};
use nalgebra::DMatrix;
use std::path::Path;

/// Percentiles bounding the default display range
const LOW_PERCENTILE: f64 = 0.5;
const HIGH_PERCENTILE: f64 = 99.5;

/// Display range covering the bulk of the valid samples
pub fn auto_range(samples: &DMatrix<f64>) -> Option<(f64, f64)> {
    let mut valid: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(f64::total_cmp);

    let at = |pct: f64| {
        let index = ((valid.len() - 1) as f64 * pct / 100.0).round() as usize;
        valid[index]
    };
    Some((at(LOW_PERCENTILE), at(HIGH_PERCENTILE)))
}

/// Linear stretch of `samples` into 8-bit gray levels; missing samples are black
pub fn stretch_to_gray(samples: &DMatrix<f64>, (low, high): (f64, f64)) -> Vec<u8> {
    let span = if high > low { high - low } else { 1.0 };
    let (rows, columns) = samples.shape();

    let mut pixels = Vec::with_capacity(rows * columns);
    for row in 0..rows {
        for column in 0..columns {
            let value = samples[(row, column)];
            let level = if value.is_nan() {
                0
            } else {
                (((value - low) / span).clamp(0.0, 1.0) * 255.0).round() as u8
            };
            pixels.push(level);
        }
    }
    pixels
}

/// Write a grayscale PNG of a sky model. Returns the display range used.
pub fn render_preview(samples: &DMatrix<f64>, range: Option<(f64, f64)>, path: &Path) -> Result<(f64, f64)> {
    let range = range
        .or_else(|| auto_range(samples))
        .unwrap_or((0.0, 1.0));

    let (rows, columns) = samples.shape();
    let buffer = ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(
        columns as u32,
        rows as u32,
        stretch_to_gray(samples, range),
    )
    .ok_or_else(|| SkyError::write(path, "preview buffer size mismatch"))?;

    buffer.save(path).map_err(|e| SkyError::write(path, e))?;
    Ok(range)
}
