//! Input frame selection and memory-bounded grouping.

use crate::error::{Result, SkyError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Naming convention of the frames a sky is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Ramps with an astrometric solution, `NNNNNNNNC<d>.ramp.new`
    Registered,
    /// Flat-fielded frames, `NNNNNNNNC<d>.flat.fits`
    Flat,
}

impl FrameKind {
    pub fn suffix(self) -> &'static str {
        match self {
            FrameKind::Registered => ".ramp.new",
            FrameKind::Flat => ".flat.fits",
        }
    }
}

/// Frames in `dir` whose name ends with the kind's suffix, sorted by name.
///
/// Names carry a zero-padded sequence number, so this order is also
/// acquisition order.
pub fn select_frames(dir: &Path, kind: FrameKind) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| SkyError::load(dir, e))?;

    let mut frames = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SkyError::load(dir, e))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.ends_with(kind.suffix()));
        if matches && path.is_file() {
            frames.push(path);
        }
    }

    if frames.is_empty() {
        return Err(SkyError::EmptyInput {
            dir: dir.to_path_buf(),
            suffix: kind.suffix(),
        });
    }

    frames.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(frames)
}

/// Split `count` frames into contiguous groups of `group_size`.
///
/// `None` or zero means a single group. Every group but the last holds
/// exactly `group_size` frames; the last holds the remainder.
pub fn partition(count: usize, group_size: Option<usize>) -> Vec<Range<usize>> {
    let size = match group_size {
        Some(size) if size > 0 => size,
        _ => count.max(1),
    };

    (0..count)
        .step_by(size)
        .map(|start| start..(start + size).min(count))
        .collect()
}
