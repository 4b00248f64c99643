//! Error types for fleetcast-dispatch.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use fleetcast_transfer::TransferError;
use thiserror::Error;

use crate::model::{JobId, Status, TargetKey};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job '{0}' has no targets")]
    NoTargets(JobId),

    #[error("job '{job}' lists target '{target}' more than once")]
    DuplicateTarget { job: JobId, target: TargetKey },

    #[error("artifact '{0}' is empty")]
    EmptyArtifact(PathBuf),

    #[error("failed to inspect artifact '{path}': {source}")]
    Artifact { path: PathBuf, source: io::Error },

    #[error("job '{0}' not found")]
    JobNotFound(JobId),

    #[error("target '{target}' is not part of job '{job}'")]
    UnknownTarget { job: JobId, target: TargetKey },

    #[error("invalid status transition for '{target}': {from} -> {to}")]
    InvalidTransition {
        target: TargetKey,
        from:   Status,
        to:     Status,
    },

    #[error("job '{0}' is already running")]
    AlreadyRunning(JobId),

    #[error("job '{0}' has no failed targets to resubmit")]
    NothingToResubmit(JobId),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Verification(#[from] fleetcast_verify::VerificationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("dispatch driver failed: {0}")]
    Join(String),
}

/// Failures of the external job/audit store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failures on the receiving side of a delivery.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Transfer(TransferError),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error(transparent)]
    Fs(#[from] fleetcast_fs::Error),

    #[error("I/O error on '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unknown chunk session '{0}'")]
    UnknownSession(String),

    #[error("agent task failed: {0}")]
    Task(String),
}

impl From<TransferError> for AgentError {
    fn from(e: TransferError) -> Self {
        if e.is_integrity() {
            Self::Integrity(e.to_string())
        } else {
            Self::Transfer(e)
        }
    }
}

impl AgentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a single delivery ended in `Fail`.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("chunk transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("target rejected the delivery ({code}): {msg}")]
    Rejected { code: u16, msg: String },

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("delivery task panicked: {0}")]
    Panicked(String),
}

impl DeliveryError {
    /// Code reported in the result payload.
    pub fn code(&self) -> u16 {
        match self {
            Self::Rejected { code, .. } => *code,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
