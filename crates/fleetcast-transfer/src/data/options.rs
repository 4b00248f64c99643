use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::progress::{Progress, ProgressObserver};
use crate::core::DEFAULT_CHUNK_SIZE;

/// Default number of chunk workers per transfer.
pub const DEFAULT_TRANSFER_CONCURRENCY: usize = 2;

/// How staged chunks are stitched back together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Append chunks in ascending index order.
    Sequential,
    /// Size the destination up front and write chunks at their offsets in
    /// parallel.
    #[default]
    Preallocated,
}

/// Options for one chunked transfer or merge.
#[derive(Clone)]
pub struct TransferOptions {
    /// Maximum bytes per chunk.
    ///
    /// Default: 1 MiB
    pub chunk_size: u64,

    /// Number of chunk workers. The pool never spawns more workers than
    /// there are chunks.
    ///
    /// Default: 2
    pub concurrency: usize,

    /// Invoked after every persisted chunk.
    ///
    /// Default: None
    pub on_progress: Option<ProgressObserver>,
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("chunk_size", &self.chunk_size)
            .field("concurrency", &self.concurrency)
            .field("on_progress", &"{ ... }")
            .finish()
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_TRANSFER_CONCURRENCY,
            on_progress: None,
        }
    }
}

impl TransferOptions {
    /// Set the chunk size.
    ///
    /// # Examples
    ///
    /// ```
    /// use fleetcast_transfer::TransferOptions;
    ///
    /// let options = TransferOptions::default().chunk_size(64 * 1024);
    /// assert_eq!(options.chunk_size, 65536);
    /// ```
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the number of chunk workers. Zero is treated as one.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn on_progress(mut self, on_progress: Arc<dyn Fn(&Progress) + Send + Sync>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }
}
