mod chunk;
mod options;
mod progress;

pub use chunk::{ChunkDescriptor, parse_chunk_index, staged_name};
pub use options::{DEFAULT_TRANSFER_CONCURRENCY, MergeStrategy, TransferOptions};
pub use progress::{Progress, ProgressObserver, TransferProgress};
