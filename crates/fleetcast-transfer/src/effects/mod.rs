mod merge;
mod pool;
mod sink;
mod split;

pub use merge::{ChunkMerger, MergeReport, discover_chunks};
pub use pool::{ChunkPool, PoolReport};
pub use sink::{ChunkSink, StagingDir};
pub use split::{ChunkTransfer, TransferReport, read_chunk};
