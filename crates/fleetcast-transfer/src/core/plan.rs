use crate::data::ChunkDescriptor;
use crate::error::{Result, TransferError};

/// Default chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 20;

/// Number of chunks needed to cover `file_len` bytes.
pub fn chunk_count(file_len: u64, chunk_size: u64) -> Result<u32> {
    if file_len == 0 {
        return Err(TransferError::EmptyArtifact);
    }
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }
    u32::try_from(file_len.div_ceil(chunk_size)).map_err(|_| TransferError::InvalidChunkSize)
}

/// Split `file_len` bytes into contiguous chunks of at most `chunk_size`.
///
/// Chunk `i` starts at `i * chunk_size`; only the last chunk may be shorter.
/// The returned ranges are in ascending index order and partition
/// `[0, file_len)` exactly.
///
/// # Errors
///
/// [`TransferError::EmptyArtifact`] for a zero-length file and
/// [`TransferError::InvalidChunkSize`] for a zero chunk size.
pub fn plan_chunks(file_len: u64, chunk_size: u64) -> Result<Vec<ChunkDescriptor>> {
    let count = chunk_count(file_len, chunk_size)?;

    Ok((0..count)
        .map(|index| {
            let offset = index as u64 * chunk_size;
            ChunkDescriptor {
                index,
                offset,
                len: chunk_size.min(file_len - offset),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_multiple() {
        let chunks = plan_chunks(4096, 1024).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len == 1024));
        assert_eq!(chunks[3].offset, 3072);
    }

    #[test]
    fn test_short_tail() {
        let chunks = plan_chunks(2_500_000, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].offset, 2 * DEFAULT_CHUNK_SIZE);
        assert_eq!(chunks[2].len, 2_500_000 - 2 * DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_smaller_than_one_chunk() {
        let chunks = plan_chunks(10, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(chunks, vec![ChunkDescriptor {
            index: 0,
            offset: 0,
            len: 10
        }]);
    }

    #[test]
    fn test_rejects_empty_and_zero_size() {
        assert!(matches!(plan_chunks(0, 1024), Err(TransferError::EmptyArtifact)));
        assert!(matches!(plan_chunks(10, 0), Err(TransferError::InvalidChunkSize)));
    }

    proptest! {
        #[test]
        fn prop_chunks_partition_the_file(len in 1u64..5_000_000, size in 1024u64..3_000_000) {
            let chunks = plan_chunks(len, size).unwrap();

            prop_assert_eq!(chunks.len() as u64, len.div_ceil(size));
            prop_assert_eq!(chunks.iter().map(|c| c.len).sum::<u64>(), len);

            let mut expected_offset = 0;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index as usize, i);
                prop_assert_eq!(chunk.offset, expected_offset);
                prop_assert!(chunk.len > 0 && chunk.len <= size);
                expected_offset = chunk.end();
            }
            prop_assert_eq!(expected_offset, len);
        }
    }
}
