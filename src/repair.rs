//! Gap filling for sky samples no frame could measure.
//!
//! A strategy fills missing positions from a filtered estimate of the sky;
//! whatever it leaves behind is set to the global median.

use crate::error::{Result, SkyError};
use crate::stats::{missing_count, missing_percent, nan_median};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_MEDIAN_SIZE: usize = 50;
pub const DEFAULT_MEAN_RADIUS: usize = 30;

/// How missing sky samples are estimated before the final median fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum RepairStrategy {
    /// Square median filter over raw values. Cheap.
    LocalMedian { size: usize },
    /// Disk mean filter over a median-seeded copy. Smoother, slower.
    LocalMean { radius: usize },
}

impl RepairStrategy {
    pub fn local_median() -> Self {
        RepairStrategy::LocalMedian {
            size: DEFAULT_MEDIAN_SIZE,
        }
    }

    pub fn local_mean() -> Self {
        RepairStrategy::LocalMean {
            radius: DEFAULT_MEAN_RADIUS,
        }
    }

    /// Same strategy with a different window size or radius
    pub fn with_extent(self, extent: usize) -> Self {
        match self {
            RepairStrategy::LocalMedian { .. } => RepairStrategy::LocalMedian { size: extent },
            RepairStrategy::LocalMean { .. } => RepairStrategy::LocalMean { radius: extent },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RepairStrategy::LocalMedian { .. } => "local-median",
            RepairStrategy::LocalMean { .. } => "local-mean",
        }
    }

    fn filler(&self) -> Box<dyn GapFiller> {
        match *self {
            RepairStrategy::LocalMedian { size } => Box::new(LocalMedianFilter { size }),
            RepairStrategy::LocalMean { radius } => Box::new(LocalMeanFilter { radius }),
        }
    }
}

/// Fills missing samples from a filtered estimate of the sky
pub trait GapFiller {
    /// Filtered values of `sky` at the given (row, column) positions
    fn estimate(&self, sky: &DMatrix<f64>, positions: &[(usize, usize)]) -> Vec<f64>;

    /// Replace missing samples with their estimate; valid samples are never
    /// touched. Returns how many positions received a valid value.
    fn fill_missing(&self, sky: &mut DMatrix<f64>) -> usize {
        let positions = missing_positions(sky);
        if positions.is_empty() {
            return 0;
        }

        let estimates = self.estimate(sky, &positions);
        let mut filled = 0;
        for (&(row, column), value) in positions.iter().zip(estimates) {
            if !value.is_nan() {
                sky[(row, column)] = value;
                filled += 1;
            }
        }
        filled
    }
}

fn missing_positions(sky: &DMatrix<f64>) -> Vec<(usize, usize)> {
    let (rows, columns) = sky.shape();
    let mut positions = Vec::new();
    for column in 0..columns {
        for row in 0..rows {
            if sky[(row, column)].is_nan() {
                positions.push((row, column));
            }
        }
    }
    positions
}

/// Index into `0..len` under `d c b a | a b c d | d c b a` reflection
fn reflect(index: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let m = index.rem_euclid(period);
    if m < len {
        m as usize
    } else {
        (period - m - 1) as usize
    }
}

/// Orders valid values ascending with every missing value after them
fn missing_last(a: &f64, b: &f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(b),
    }
}

/// Median over a `size` x `size` window with reflected borders.
///
/// The window is not cleaned of missing values: they rank above every valid
/// value, so a window that is mostly missing yields a missing estimate.
#[derive(Debug, Clone, Copy)]
pub struct LocalMedianFilter {
    pub size: usize,
}

impl GapFiller for LocalMedianFilter {
    fn estimate(&self, sky: &DMatrix<f64>, positions: &[(usize, usize)]) -> Vec<f64> {
        let size = self.size.max(1);
        let (rows, columns) = sky.shape();
        let before = (size / 2) as isize;
        let after = (size - size / 2) as isize;

        let mut window = Vec::with_capacity(size * size);
        positions
            .iter()
            .map(|&(row, column)| {
                window.clear();
                for dr in -before..after {
                    let r = reflect(row as isize + dr, rows);
                    for dc in -before..after {
                        let c = reflect(column as isize + dc, columns);
                        window.push(sky[(r, c)]);
                    }
                }
                let rank = window.len() / 2;
                *window.select_nth_unstable_by(rank, missing_last).1
            })
            .collect()
    }
}

/// Mean over a disk footprint of a copy of the sky whose missing samples
/// were seeded with the global median. Footprint points outside the image
/// are left out of the mean.
#[derive(Debug, Clone, Copy)]
pub struct LocalMeanFilter {
    pub radius: usize,
}

impl LocalMeanFilter {
    fn footprint(&self) -> Vec<(isize, isize)> {
        let r = self.radius as isize;
        let mut offsets = Vec::new();
        for dr in -r..=r {
            for dc in -r..=r {
                if dr * dr + dc * dc <= r * r {
                    offsets.push((dr, dc));
                }
            }
        }
        offsets
    }
}

impl GapFiller for LocalMeanFilter {
    fn estimate(&self, sky: &DMatrix<f64>, positions: &[(usize, usize)]) -> Vec<f64> {
        let seed = nan_median(sky);
        if seed.is_nan() {
            return vec![f64::NAN; positions.len()];
        }
        let seeded = sky.map(|v| if v.is_nan() { seed } else { v });

        let (rows, columns) = sky.shape();
        let footprint = self.footprint();
        positions
            .iter()
            .map(|&(row, column)| {
                let mut sum = 0.0;
                let mut count = 0usize;
                for &(dr, dc) in &footprint {
                    let r = row as isize + dr;
                    let c = column as isize + dc;
                    if r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < columns {
                        sum += seeded[(r as usize, c as usize)];
                        count += 1;
                    }
                }
                sum / count as f64
            })
            .collect()
    }
}

/// What the cascade did to a sky model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairReport {
    pub missing_before: usize,
    pub missing_percent: f64,
    /// Strategy that ran, `None` when the missing fraction stayed under threshold
    pub strategy_applied: Option<RepairStrategy>,
    pub filled_by_strategy: usize,
    pub filled_by_cleanup: usize,
    /// Global median of the sky after strategy repair
    pub median: f64,
}

/// Run the gap-filling cascade on `sky` in place.
///
/// The strategy runs when the missing percentage is at least
/// `nan_threshold`. Anything still missing afterwards takes the global
/// median, so the returned sky has no missing samples.
pub fn repair_sky(sky: &mut DMatrix<f64>, nan_threshold: f64, strategy: RepairStrategy) -> Result<RepairReport> {
    let missing_before = missing_count(sky);
    let percent = missing_percent(sky);

    let mut strategy_applied = None;
    let mut filled_by_strategy = 0;
    if missing_before > 0 && percent >= nan_threshold {
        tracing::info!(
            "Missing {:.3}% >= {}%, repairing with {}",
            percent,
            nan_threshold,
            strategy.name()
        );
        filled_by_strategy = strategy.filler().fill_missing(sky);
        strategy_applied = Some(strategy);
        tracing::info!(
            "After {}: {:.3}% missing",
            strategy.name(),
            missing_percent(sky)
        );
    }

    let median = nan_median(sky);
    let remaining = missing_count(sky);
    if remaining > 0 {
        if median.is_nan() {
            return Err(SkyError::NoValidSamples);
        }
        tracing::info!("Filling {} remaining samples with median {}", remaining, median);
        sky.iter_mut().filter(|v| v.is_nan()).for_each(|v| *v = median);
    }

    Ok(RepairReport {
        missing_before,
        missing_percent: percent,
        strategy_applied,
        filled_by_strategy,
        filled_by_cleanup: remaining,
        median,
    })
}
