use std::path::PathBuf;

use crate::algorithms::StrategyAttempt;

/// Errors that abort a registration run.
///
/// Every variant is fatal: the pipeline stops at the failing step and leaves
/// already-written outputs in place.
#[derive(thiserror::Error, Debug)]
pub enum RegistrationError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("output location already exists: {}", path.display())]
    OutputConflict { path: PathBuf },

    #[error("cannot open reference image {}: {source}", path.display())]
    ReferenceOpen {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(
        "no correspondences between {reference} and {target} (pair {pair_index}) after {} attempts, last strategy {}",
        attempts.len(),
        attempts.last().map(|a| a.strategy.name()).unwrap_or("none")
    )]
    CorrespondenceNotFound {
        pair_index: usize,
        reference: String,
        target: String,
        attempts: Vec<StrategyAttempt>,
    },

    #[error("landmarks for round {round} are missing ({available} records stored)")]
    LandmarkMissing { round: usize, available: usize },

    #[error("warping {file} (round {round}) failed: {reason}")]
    WarpApplication {
        round: usize,
        file: String,
        reason: String,
    },

    #[error("cannot open channel image {}: {source}", path.display())]
    ChannelOpen {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("a registration run is already in progress")]
    RunInProgress,

    #[error("run cancelled during {stage}")]
    Cancelled { stage: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {reason}", path.display())]
    Export { path: PathBuf, reason: String },
}

impl RegistrationError {
    /// Stable name of the error kind, used in failure notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::OutputConflict { .. } => "OutputConflictError",
            Self::ReferenceOpen { .. } => "ReferenceOpenError",
            Self::CorrespondenceNotFound { .. } => "CorrespondenceNotFoundError",
            Self::LandmarkMissing { .. } => "LandmarkMissingError",
            Self::WarpApplication { .. } => "WarpApplicationError",
            Self::ChannelOpen { .. } => "ChannelOpenError",
            Self::RunInProgress => "RunInProgressError",
            Self::Cancelled { .. } => "CancelledError",
            Self::Io { .. } => "IoError",
            Self::Export { .. } => "ExportError",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn export(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Export {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
