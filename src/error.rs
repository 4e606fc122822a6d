use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while generating a sky model
#[derive(Error, Debug)]
pub enum SkyError {
    #[error("no input frames matching '*{suffix}' in {}", dir.display())]
    EmptyInput { dir: PathBuf, suffix: &'static str },

    #[error("failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("failed to write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },

    #[error(
        "frame {} is {}x{}, expected {}x{}",
        path.display(),
        found.0,
        found.1,
        expected.0,
        expected.1
    )]
    ShapeMismatch {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("file name '{name}' is too short to carry a sequence id and detector")]
    InvalidFileName { name: String },

    #[error("sky model has no valid samples left to derive a fill value from")]
    NoValidSamples,

    #[error("sky task for detector {detector} did not complete: {reason}")]
    TaskFailed { detector: u8, reason: String },
}

impl SkyError {
    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SkyError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SkyError::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SkyError>;
