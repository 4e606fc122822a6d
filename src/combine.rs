//! Robust per-group combination and cross-group aggregation.

use crate::stats::{median_in_place, nan_median, sigma_clip};
use nalgebra::DMatrix;

/// Outcome of preparing one frame for combination
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreparedFrame {
    /// Samples rejected by sigma clipping
    pub rejected: usize,
    /// Median the frame was divided by, `None` if it could not be scaled
    pub scale: Option<f64>,
}

/// Clip outliers (when `sigma` is set) and normalize a frame in place
pub fn prepare_frame(
    samples: &mut DMatrix<f64>,
    sigma: Option<f64>,
    reference: Option<&DMatrix<f64>>,
) -> PreparedFrame {
    let rejected = match sigma {
        Some(sigma) => sigma_clip(samples, sigma, reference),
        None => 0,
    };
    let scale = normalize(samples);
    PreparedFrame { rejected, scale }
}

/// Divide a frame by its own median, ignoring missing samples.
///
/// A frame with a zero or undefined median cannot be brought onto a common
/// scale with the rest of the group; it is marked entirely missing instead.
pub fn normalize(samples: &mut DMatrix<f64>) -> Option<f64> {
    let scale = nan_median(samples);
    if !scale.is_finite() || scale == 0.0 {
        samples.fill(f64::NAN);
        return None;
    }

    samples.iter_mut().for_each(|v| *v /= scale);
    Some(scale)
}

/// Element-wise median of a group of equally sized, normalized frames.
///
/// A position is missing in the result only if it is missing in every frame.
pub fn combine_group(frames: &[DMatrix<f64>]) -> DMatrix<f64> {
    elementwise_median(frames)
}

/// Element-wise median across per-group results.
///
/// A single group passes through untouched.
pub fn aggregate(mut groups: Vec<DMatrix<f64>>) -> DMatrix<f64> {
    if groups.len() == 1 {
        return groups.swap_remove(0);
    }
    elementwise_median(&groups)
}

fn elementwise_median(stack: &[DMatrix<f64>]) -> DMatrix<f64> {
    let Some(first) = stack.first() else {
        return DMatrix::zeros(0, 0);
    };
    let (rows, columns) = first.shape();
    debug_assert!(stack.iter().all(|m| m.shape() == (rows, columns)));

    let layers: Vec<&[f64]> = stack.iter().map(|m| m.as_slice()).collect();
    let mut column = Vec::with_capacity(stack.len());
    let combined: Vec<f64> = (0..rows * columns)
        .map(|i| {
            column.clear();
            column.extend(layers.iter().map(|layer| layer[i]).filter(|v| !v.is_nan()));
            median_in_place(&mut column)
        })
        .collect();

    // Same column-major layout as the inputs
    DMatrix::from_vec(rows, columns, combined)
}
