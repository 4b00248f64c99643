mod plan;

pub use plan::{DEFAULT_CHUNK_SIZE, chunk_count, plan_chunks};
