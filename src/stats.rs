//! Missing-aware robust statistics over sample matrices.
//!
//! NaN is the missing sentinel throughout: every statistic here skips it,
//! and sigma clipping marks rejected samples by writing it back.

use bumpalo::Bump;
use nalgebra::DMatrix;

/// Iteration bound for sigma clipping
pub const MAX_CLIP_ITERATIONS: usize = 5;

pub fn missing_count(samples: &DMatrix<f64>) -> usize {
    samples.iter().filter(|v| v.is_nan()).count()
}

/// Percentage (0-100) of missing samples
pub fn missing_percent(samples: &DMatrix<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    100.0 * missing_count(samples) as f64 / samples.len() as f64
}

/// Median of a slice that holds no missing values. Reorders the slice.
///
/// Even-length input averages the two middle values. Empty input gives NaN.
pub fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }

    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (below + upper) / 2.0
    }
}

/// Median ignoring missing samples; NaN when every sample is missing
pub fn nan_median(samples: &DMatrix<f64>) -> f64 {
    // Whole-frame scratch lives in an arena, released in one go
    let arena = Bump::new();
    let mut valid = bumpalo::vec![in &arena];
    valid.extend(samples.iter().copied().filter(|v| !v.is_nan()));
    median_in_place(&mut valid)
}

/// Mean and population standard deviation of a slice without missing values
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Iterative sigma clipping of `samples - reference`.
///
/// Each pass takes the median and standard deviation of the residuals that
/// are still accepted and rejects those further than `sigma` deviations from
/// the median. Stops after [`MAX_CLIP_ITERATIONS`] or when a pass rejects
/// nothing. Rejected positions, and positions whose residual is missing
/// because the reference is missing there, become NaN in `samples`.
///
/// Returns the number of samples newly rejected.
pub fn sigma_clip(samples: &mut DMatrix<f64>, sigma: f64, reference: Option<&DMatrix<f64>>) -> usize {
    let residuals: Vec<f64> = match reference {
        Some(sky) => samples.iter().zip(sky.iter()).map(|(s, r)| s - r).collect(),
        None => samples.iter().copied().collect(),
    };

    let mut rejected = vec![false; residuals.len()];
    let mut rejected_total = 0;

    let arena = Bump::new();
    let mut accepted = bumpalo::vec![in &arena];

    for _ in 0..MAX_CLIP_ITERATIONS {
        accepted.clear();
        accepted.extend(
            residuals
                .iter()
                .zip(&rejected)
                .filter(|(value, flag)| !**flag && !value.is_nan())
                .map(|(value, _)| *value),
        );
        if accepted.is_empty() {
            break;
        }

        let (_, spread) = mean_and_std(&accepted);
        let center = median_in_place(&mut accepted);
        let limit = sigma * spread;

        let mut newly_rejected = 0;
        for (value, flag) in residuals.iter().zip(rejected.iter_mut()) {
            if !*flag && !value.is_nan() && (value - center).abs() > limit {
                *flag = true;
                newly_rejected += 1;
            }
        }

        rejected_total += newly_rejected;
        if newly_rejected == 0 {
            break;
        }
    }

    for ((sample, residual), flag) in samples.iter_mut().zip(&residuals).zip(&rejected) {
        if *flag || residual.is_nan() {
            *sample = f64::NAN;
        }
    }

    rejected_total
}
