use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("checksum mismatch: expected {}, got {}", hex::encode(expected), hex::encode(actual))]
    Mismatch { expected: Vec<u8>, actual: Vec<u8> },

    #[error("invalid hex digest '{0}'")]
    InvalidDigest(String),

    #[error("failed to read '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VerificationError {
    pub fn is_mismatch(&self) -> bool { matches!(self, Self::Mismatch { .. }) }
}

pub type Result<T> = std::result::Result<T, VerificationError>;
