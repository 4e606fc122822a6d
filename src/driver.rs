//! Concurrent sky generation across detectors.
//!
//! Each detector directory is independent, so every detector gets its own
//! blocking task and the driver only waits for all of them.

use crate::detectors::DetectorTable;
use crate::error::{Result, SkyError};
use crate::fits::ImageStore;
use crate::selection::FrameKind;
use crate::sky::{generate_sky, SkyConfig, SkyRun};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where each detector's frames live and how its sky is built
#[derive(Debug, Clone)]
pub struct DetectorPlan {
    /// Observation directory holding one `C<id>` directory per detector
    pub parent: PathBuf,
    pub detectors: Vec<u8>,
    pub input_subdir: String,
    pub output_subdir: String,
    /// Settings shared by every detector; directories and sigma are replaced
    pub base: SkyConfig,
}

impl DetectorPlan {
    pub fn new(parent: impl Into<PathBuf>, detectors: Vec<u8>, kind: FrameKind) -> Self {
        let input_subdir = match kind {
            FrameKind::Registered => "astrom",
            FrameKind::Flat => "flat",
        };
        Self {
            parent: parent.into(),
            detectors,
            input_subdir: input_subdir.to_string(),
            output_subdir: "sky".to_string(),
            base: SkyConfig::for_kind(kind, ".", "."),
        }
    }

    pub fn detector_dir(&self, detector: u8) -> PathBuf {
        self.parent.join(format!("C{}", detector))
    }

    /// Config for one detector, clipping with the table's sigma
    pub fn config_for(&self, detector: u8, table: &DetectorTable) -> SkyConfig {
        let dir = self.detector_dir(detector);
        SkyConfig {
            source_dir: dir.join(&self.input_subdir),
            output_dir: dir.join(&self.output_subdir),
            sigma: table.sigma(detector),
            ..self.base.clone()
        }
    }
}

/// Result of one detector's run
#[derive(Debug)]
pub struct DetectorOutcome {
    pub detector: u8,
    pub result: Result<SkyRun>,
}

/// Generate every detector's sky concurrently and wait for all of them.
///
/// A failing detector does not stop the others. Outcomes are returned in
/// plan order.
pub async fn run_detectors<S>(store: Arc<S>, plan: &DetectorPlan, table: &DetectorTable) -> Vec<DetectorOutcome>
where
    S: ImageStore + Send + Sync + 'static,
{
    let handles: Vec<_> = plan
        .detectors
        .iter()
        .map(|&detector| {
            let config = plan.config_for(detector, table);
            let store = Arc::clone(&store);
            tracing::info!(
                "Detector {}: {} -> {}",
                detector,
                config.source_dir.display(),
                config.output_dir.display()
            );
            let handle = tokio::task::spawn_blocking(move || {
                ensure_output_dir(&config.output_dir)?;
                generate_sky(store.as_ref(), &config)
            });
            (detector, handle)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (detector, handle) in handles {
        let result = handle.await.unwrap_or_else(|e| {
            Err(SkyError::TaskFailed {
                detector,
                reason: e.to_string(),
            })
        });
        match &result {
            Ok(run) => tracing::info!("Detector {}: wrote {}", detector, run.output_path.display()),
            Err(e) => tracing::error!("Detector {}: {}", detector, e),
        }
        outcomes.push(DetectorOutcome { detector, result });
    }
    outcomes
}

fn ensure_output_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| SkyError::write(dir, e))
}
