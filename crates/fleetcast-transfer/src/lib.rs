//! Chunked artifact transfer with bounded parallelism and verified
//! reconstruction.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - `data` - Descriptors, options and progress counters
//! - `core` - Pure chunk planning
//! - `effects` - File I/O behind the [`ChunkSink`] abstraction and the worker pool
//!
//! # Key Features
//!
//! - **Fail-Fast Pool**: the first failed chunk drains the shared queue, no chunk is retried
//! - **Out-of-Order Safe**: progress only moves forward and merging never relies on completion order
//! - **Verified Rebuild**: merged files are streamed through `fleetcast-verify` before use
//! - **No Leftovers**: staging lives in a `fleetcast-fs::Workspace` that cleans up on drop

mod core;
mod data;
mod effects;
mod error;

pub use core::{DEFAULT_CHUNK_SIZE, chunk_count, plan_chunks};
pub use data::{
    ChunkDescriptor, DEFAULT_TRANSFER_CONCURRENCY, MergeStrategy, Progress, ProgressObserver,
    TransferOptions, TransferProgress, parse_chunk_index, staged_name,
};
pub use effects::{
    ChunkMerger, ChunkPool, ChunkSink, ChunkTransfer, MergeReport, PoolReport, StagingDir,
    TransferReport, discover_chunks, read_chunk,
};
pub use error::{BoxError, Result, TransferError};
