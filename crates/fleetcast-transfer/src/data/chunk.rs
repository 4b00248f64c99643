use serde::{Deserialize, Serialize};

/// One contiguous byte range of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Chunk index (0-based)
    pub index: u32,
    /// Starting byte offset
    pub offset: u64,
    /// Number of bytes in this chunk
    pub len: u64,
}

impl ChunkDescriptor {
    /// Ending byte offset (exclusive).
    pub fn end(&self) -> u64 { self.offset + self.len }
}

/// Name under which a chunk is staged: `<file_name>.<index>`.
pub fn staged_name(file_name: &str, index: u32) -> String { format!("{file_name}.{index}") }

/// Inverse of [`staged_name`]. Returns `None` for files that are not chunks of
/// `file_name`, including non-numeric suffixes.
pub fn parse_chunk_index(file_name: &str, candidate: &str) -> Option<u32> {
    let suffix = candidate.strip_prefix(file_name)?.strip_prefix('.')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_name_roundtrip() {
        let name = staged_name("app.jar", 12);
        assert_eq!(name, "app.jar.12");
        assert_eq!(parse_chunk_index("app.jar", &name), Some(12));
    }

    #[test]
    fn test_parse_chunk_index_ignores_foreign_files() {
        assert_eq!(parse_chunk_index("app.jar", "app.jar"), None);
        assert_eq!(parse_chunk_index("app.jar", "app.jar.tmp"), None);
        assert_eq!(parse_chunk_index("app.jar", "app.jar.-1"), None);
        assert_eq!(parse_chunk_index("app.jar", "app.jar.+1"), None);
        assert_eq!(parse_chunk_index("app.jar", "other.jar.0"), None);
        assert_eq!(parse_chunk_index("app", "app.jar.0"), None);
    }

    #[test]
    fn test_descriptor_end() {
        let chunk = ChunkDescriptor {
            index: 2,
            offset: 2048,
            len: 100,
        };
        assert_eq!(chunk.end(), 2148);
    }
}
