//! Sky model generation: select, combine per group, aggregate, repair, persist.

use crate::combine::{aggregate, combine_group, prepare_frame};
use crate::error::{Result, SkyError};
use crate::fits::{CardValue, Frame, Header, ImageStore};
use crate::naming::sky_file_name;
use crate::repair::{repair_sky, RepairReport, RepairStrategy};
use crate::selection::{partition, select_frames, FrameKind};
use chrono::Utc;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Caller-supplied settings for one sky generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SkyConfigFile")]
pub struct SkyConfig {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub kind: FrameKind,
    /// Frames loaded at once; `None` loads every frame as one group
    pub group_size: Option<usize>,
    /// Clipping threshold in standard deviations; `None` disables clipping
    pub sigma: Option<f64>,
    /// Missing percentage at or above which the repair strategy runs
    pub nan_threshold: f64,
    pub repair: RepairStrategy,
    /// Earlier sky model to clip against instead of zero
    pub prior_sky: Option<PathBuf>,
}

impl Default for SkyConfig {
    fn default() -> Self {
        Self::for_kind(FrameKind::Registered, ".", ".")
    }
}

impl SkyConfig {
    /// Defaults used for each frame kind: registered ramps repair with the
    /// median filter above 3% missing, flat-fielded frames always repair with
    /// the mean filter.
    pub fn for_kind(kind: FrameKind, source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let (nan_threshold, repair) = match kind {
            FrameKind::Registered => (3.0, RepairStrategy::local_median()),
            FrameKind::Flat => (0.0, RepairStrategy::local_mean()),
        };
        Self {
            source_dir: source_dir.into(),
            output_dir: output_dir.into(),
            kind,
            group_size: None,
            sigma: None,
            nan_threshold,
            repair,
            prior_sky: None,
        }
    }

    /// Load a JSON config; fields left out take the defaults of its kind
    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json_file_with_kind(path, None)
    }

    /// Load a JSON config with the frame kind forced to `kind` when given.
    /// Threshold and strategy left out of the file follow the final kind.
    pub fn from_json_file_with_kind(path: &Path, kind: Option<FrameKind>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| SkyError::load(path, e))?;
        let file: SkyConfigFile = serde_json::from_str(&text).map_err(|e| SkyError::load(path, e))?;
        Ok(file.into_config(kind))
    }

    /// Settle every optional setting for a run over `frame_count` frames
    pub fn resolve<S: ImageStore + ?Sized>(&self, store: &S, frame_count: usize) -> Result<ResolvedSky> {
        let group_size = match self.group_size {
            Some(size) if size > 0 => size,
            _ => frame_count.max(1),
        };

        let reference = match &self.prior_sky {
            Some(path) => {
                tracing::info!("Clipping against prior sky {}", path.display());
                Some(store.load(path)?.samples)
            }
            None => None,
        };

        Ok(ResolvedSky {
            kind: self.kind,
            group_size,
            sigma: self.sigma,
            nan_threshold: self.nan_threshold,
            repair: self.repair,
            reference,
        })
    }
}

/// On-disk form of [`SkyConfig`]: every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SkyConfigFile {
    pub source_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub kind: Option<FrameKind>,
    pub group_size: Option<usize>,
    pub sigma: Option<f64>,
    pub nan_threshold: Option<f64>,
    pub repair: Option<RepairStrategy>,
    pub prior_sky: Option<PathBuf>,
}

impl SkyConfigFile {
    /// Fill the gaps from the presets of the resulting kind
    pub fn into_config(self, kind: Option<FrameKind>) -> SkyConfig {
        let kind = kind.or(self.kind).unwrap_or(FrameKind::Registered);
        let preset = SkyConfig::for_kind(
            kind,
            self.source_dir.unwrap_or_else(|| PathBuf::from(".")),
            self.output_dir.unwrap_or_else(|| PathBuf::from(".")),
        );
        SkyConfig {
            group_size: self.group_size,
            sigma: self.sigma,
            nan_threshold: self.nan_threshold.unwrap_or(preset.nan_threshold),
            repair: self.repair.unwrap_or(preset.repair),
            prior_sky: self.prior_sky,
            ..preset
        }
    }
}

impl From<SkyConfigFile> for SkyConfig {
    fn from(file: SkyConfigFile) -> Self {
        file.into_config(None)
    }
}

/// Run settings with every default applied
#[derive(Debug, Clone)]
pub struct ResolvedSky {
    pub kind: FrameKind,
    pub group_size: usize,
    pub sigma: Option<f64>,
    pub nan_threshold: f64,
    pub repair: RepairStrategy,
    pub reference: Option<DMatrix<f64>>,
}

/// Combined sky samples with the header they inherit
#[derive(Debug, Clone)]
pub struct SkyModel {
    pub samples: DMatrix<f64>,
    pub header: Header,
    pub frame_count: usize,
    pub group_count: usize,
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct SkyRun {
    pub output_path: PathBuf,
    pub frame_count: usize,
    pub group_count: usize,
    pub repair: RepairReport,
}

/// Combine `frames` into a sky model without repairing or persisting it.
///
/// Frames are loaded one group at a time. Each is clipped and normalized,
/// every group is reduced to its element-wise median, and the groups are
/// reduced the same way. The header comes from the last frame.
pub fn build_sky_model<S: ImageStore + ?Sized>(
    store: &S,
    frames: &[PathBuf],
    resolved: &ResolvedSky,
) -> Result<SkyModel> {
    let groups = partition(frames.len(), Some(resolved.group_size));
    let mut expected_shape = resolved.reference.as_ref().map(|r| r.shape());
    let mut group_results = Vec::with_capacity(groups.len());
    let mut last_header = Header::new();

    for (index, range) in groups.iter().enumerate() {
        let started = Utc::now();
        let mut members = Vec::with_capacity(range.len());

        for path in &frames[range.clone()] {
            let Frame { mut samples, header } = store.load(path)?;

            let shape = samples.shape();
            match expected_shape {
                Some(expected) if expected != shape => {
                    return Err(SkyError::ShapeMismatch {
                        path: path.clone(),
                        expected,
                        found: shape,
                    });
                }
                Some(_) => {}
                None => expected_shape = Some(shape),
            }

            let prepared = prepare_frame(&mut samples, resolved.sigma, resolved.reference.as_ref());
            match prepared.scale {
                Some(scale) => tracing::debug!(
                    "{}: scale {:.4}, {} samples clipped",
                    path.display(),
                    scale,
                    prepared.rejected
                ),
                None => tracing::warn!(
                    "{}: median is zero or undefined, frame ignored",
                    path.display()
                ),
            }

            members.push(samples);
            last_header = header;
        }

        group_results.push(combine_group(&members));
        let elapsed = Utc::now() - started;
        tracing::info!(
            "Group {}/{} ({} frames) combined in {:.2}s",
            index + 1,
            groups.len(),
            members.len(),
            elapsed.num_milliseconds() as f64 / 1000.0
        );
    }

    Ok(SkyModel {
        samples: aggregate(group_results),
        header: last_header,
        frame_count: frames.len(),
        group_count: groups.len(),
    })
}

/// Generate, repair and write the sky model for one frame directory
pub fn generate_sky<S: ImageStore + ?Sized>(store: &S, config: &SkyConfig) -> Result<SkyRun> {
    let frames = select_frames(&config.source_dir, config.kind)?;
    tracing::info!(
        "Generating sky from {} frames in {}",
        frames.len(),
        config.source_dir.display()
    );
    generate_sky_from_frames(store, &frames, config)
}

/// Same as [`generate_sky`] over an already selected, sorted frame list
pub fn generate_sky_from_frames<S: ImageStore + ?Sized>(
    store: &S,
    frames: &[PathBuf],
    config: &SkyConfig,
) -> Result<SkyRun> {
    let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
        return Err(SkyError::EmptyInput {
            dir: config.source_dir.clone(),
            suffix: config.kind.suffix(),
        });
    };

    let resolved = config.resolve(store, frames.len())?;
    let mut model = build_sky_model(store, frames, &resolved)?;
    let repair = repair_sky(&mut model.samples, resolved.nan_threshold, resolved.repair)?;

    let name = sky_file_name(resolved.kind, first, last, &model.header)?;
    let output_path = config.output_dir.join(name);
    let (frame_count, group_count) = persist(store, &output_path, model, &repair)?;
    tracing::info!("Wrote sky model {}", output_path.display());

    Ok(SkyRun {
        output_path,
        frame_count,
        group_count,
        repair,
    })
}

/// Write the model with provenance cards; the model is consumed
fn persist<S: ImageStore + ?Sized>(
    store: &S,
    path: &Path,
    model: SkyModel,
    repair: &RepairReport,
) -> Result<(usize, usize)> {
    let SkyModel {
        samples,
        mut header,
        frame_count,
        group_count,
    } = model;

    header.set("NCOMBINE", CardValue::Integer(frame_count as i64));
    header.set("SKYGRPS", CardValue::Integer(group_count as i64));
    if let Some(strategy) = repair.strategy_applied {
        header.set("SKYREPR", CardValue::Text(strategy.name().to_string()));
    }
    header.set(
        "SKYDATE",
        CardValue::Text(Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
    );

    store.save(path, &samples, &header, true)?;
    Ok((frame_count, group_count))
}
