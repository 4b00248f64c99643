//! Error types for fleetcast-transfer.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("artifact is empty")]
    EmptyArtifact,

    #[error("chunk size must be greater than 0")]
    InvalidChunkSize,

    #[error("chunk I/O failed on '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("chunk {index} was rejected by the sink: {source}")]
    Sink { index: u32, source: BoxError },

    #[error("chunk {index} is missing from the staging area")]
    MissingChunk { index: u32 },

    #[error("unexpected chunk {index} in the staging area")]
    UnexpectedChunk { index: u32 },

    #[error("reconstructed length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error(transparent)]
    Fs(#[from] fleetcast_fs::Error),

    #[error(transparent)]
    Verification(#[from] fleetcast_verify::VerificationError),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("chunk worker panicked")]
    WorkerPanicked,
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The reconstructed content did not match the source digest.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Verification(e) if e.is_mismatch())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
