use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use super::pool::ChunkPool;
use super::sink::ChunkSink;
use crate::core::plan_chunks;
use crate::data::{ChunkDescriptor, TransferOptions, TransferProgress};
use crate::error::{Result, TransferError};

/// Summary of a finished chunked transfer.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub chunks:  u32,
    pub bytes:   u64,
    pub elapsed: Duration,
    /// Chunk indices in the order workers started them.
    pub started: Vec<u32>,
}

/// Splits a source file into chunks and pushes them into a [`ChunkSink`].
#[derive(Debug, Clone)]
pub struct ChunkTransfer {
    source:  PathBuf,
    options: TransferOptions,
}

impl ChunkTransfer {
    pub fn new(source: impl Into<PathBuf>, options: TransferOptions) -> Self {
        Self {
            source: source.into(),
            options,
        }
    }

    /// Plan chunks for the source as it currently is on disk.
    pub async fn plan(&self) -> Result<Vec<ChunkDescriptor>> {
        let len = tokio::fs::metadata(&self.source)
            .await
            .map_err(|e| TransferError::io(&self.source, e))?
            .len();
        plan_chunks(len, self.options.chunk_size)
    }

    pub async fn run<S: ChunkSink + 'static>(&self, sink: Arc<S>) -> Result<TransferReport> {
        let start = Instant::now();
        let chunks = self.plan().await?;
        let count = chunks.len() as u32;
        let bytes = chunks.last().map(ChunkDescriptor::end).unwrap_or_default();

        let progress = Arc::new(TransferProgress::new(bytes, self.options.on_progress.clone()));
        let source = Arc::new(self.source.clone());

        let report = ChunkPool::new(self.options.concurrency)
            .run(chunks, move |chunk| {
                let source = Arc::clone(&source);
                let sink = Arc::clone(&sink);
                let progress = Arc::clone(&progress);
                async move {
                    let data = read_chunk(&source, &chunk).await?;
                    sink.write_chunk(&chunk, data)
                        .await
                        .map_err(|e| TransferError::Sink {
                            index:  chunk.index,
                            source: Box::new(e),
                        })?;
                    progress.advance(chunk.index, chunk.end());
                    debug!(chunk = chunk.index, len = chunk.len, "chunk persisted");
                    Ok(())
                }
            })
            .await?;

        let elapsed = start.elapsed();
        info!(
            source = %self.source.display(),
            chunks = count,
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "chunked transfer complete"
        );

        Ok(TransferReport {
            chunks: count,
            bytes,
            elapsed,
            started: report.started,
        })
    }
}

/// Read one chunk's byte range from `path` with its own file handle.
pub async fn read_chunk(path: &Path, chunk: &ChunkDescriptor) -> Result<Bytes> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| TransferError::io(path, e))?;
    file.seek(SeekFrom::Start(chunk.offset))
        .await
        .map_err(|e| TransferError::io(path, e))?;

    let mut buf = vec![0u8; chunk.len as usize];
    file.read_exact(&mut buf)
        .await
        .map_err(|e| TransferError::io(path, e))?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Progress;
    use crate::effects::StagingDir;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_chunk_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("src.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let chunk = ChunkDescriptor {
            index: 1,
            offset: 4,
            len: 4,
        };
        assert_eq!(&read_chunk(&path, &chunk).await.unwrap()[..], b"4567");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transfer_stages_every_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.jar");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let options = TransferOptions::default()
            .chunk_size(1024)
            .concurrency(3)
            .on_progress(Arc::new(move |p: &Progress| log.lock().unwrap().push(p.bytes_completed)));

        let staging = Arc::new(StagingDir::create(dir.path().join("stage"), "app.jar").unwrap());
        let report = ChunkTransfer::new(&path, options)
            .run(Arc::clone(&staging))
            .await
            .unwrap();

        assert_eq!(report.chunks, 10);
        assert_eq!(report.bytes, 10_000);
        for i in 0..10u32 {
            let staged = std::fs::read(staging.chunk_path(i)).unwrap();
            let start = i as usize * 1024;
            let end = (start + 1024).min(data.len());
            assert_eq!(staged, &data[start..end]);
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert_eq!(seen.iter().max(), Some(&10_000));
    }

    #[tokio::test]
    async fn test_missing_source_is_io_error() {
        let dir = tempdir().unwrap();
        let staging = Arc::new(StagingDir::create(dir.path().join("stage"), "x").unwrap());
        let result = ChunkTransfer::new(dir.path().join("absent"), TransferOptions::default())
            .run(staging)
            .await;
        assert!(matches!(result, Err(TransferError::Io { .. })));
    }
}
