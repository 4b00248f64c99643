//! Reconstruction of an artifact from its staged chunks.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::pool::ChunkPool;
use crate::core::{chunk_count, plan_chunks};
use crate::data::{ChunkDescriptor, MergeStrategy, TransferOptions, TransferProgress, parse_chunk_index};
use crate::error::{Result, TransferError};

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub chunks:   u32,
    pub bytes:    u64,
    pub strategy: MergeStrategy,
    pub elapsed:  Duration,
}

/// Find the staged chunks of `file_name` in `dir`, keyed by index.
///
/// Files whose suffix is not a decimal index are ignored, so the map's
/// iteration order is the numeric chunk order.
pub async fn discover_chunks(dir: &Path, file_name: &str) -> Result<BTreeMap<u32, PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| TransferError::io(dir, e))?;

    let mut found = BTreeMap::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| TransferError::io(dir, e))? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(index) = parse_chunk_index(file_name, name) {
            found.insert(index, entry.path());
        }
    }
    Ok(found)
}

/// Stitches staged chunks back into a single file.
#[derive(Debug, Clone)]
pub struct ChunkMerger {
    strategy: MergeStrategy,
    options:  TransferOptions,
}

impl ChunkMerger {
    pub fn new(strategy: MergeStrategy, options: TransferOptions) -> Self { Self { strategy, options } }

    pub fn strategy(&self) -> MergeStrategy { self.strategy }

    /// Same merger for chunks planned with a different size.
    pub fn with_chunk_size(&self, chunk_size: u64) -> Self {
        Self {
            strategy: self.strategy,
            options:  self.options.clone().chunk_size(chunk_size),
        }
    }

    /// Merge the chunks of `file_name` found in `staging` into `destination`.
    ///
    /// The staged index set must be exactly `[0, chunk_count)` and every
    /// chunk must have its planned length; the result must be `file_len`
    /// bytes long.
    pub async fn merge(
        &self,
        staging: &Path,
        file_name: &str,
        file_len: u64,
        destination: &Path,
    ) -> Result<MergeReport> {
        let start = Instant::now();
        let expected = chunk_count(file_len, self.options.chunk_size)?;
        let found = discover_chunks(staging, file_name).await?;

        if let Some(index) = (0..expected).find(|i| !found.contains_key(i)) {
            return Err(TransferError::MissingChunk { index });
        }
        if let Some((&index, _)) = found.range(expected..).next() {
            return Err(TransferError::UnexpectedChunk { index });
        }

        let plan = plan_chunks(file_len, self.options.chunk_size)?;
        for chunk in &plan {
            let path = &found[&chunk.index];
            let actual = tokio::fs::metadata(path)
                .await
                .map_err(|e| TransferError::io(path, e))?
                .len();
            if actual != chunk.len {
                return Err(TransferError::LengthMismatch {
                    expected: chunk.len,
                    actual,
                });
            }
        }

        match self.strategy {
            MergeStrategy::Sequential => self.merge_sequential(&plan, &found, destination).await?,
            MergeStrategy::Preallocated => {
                self.merge_preallocated(plan, found, file_len, destination).await?
            }
        }

        let actual = tokio::fs::metadata(destination)
            .await
            .map_err(|e| TransferError::io(destination, e))?
            .len();
        if actual != file_len {
            return Err(TransferError::LengthMismatch {
                expected: file_len,
                actual,
            });
        }

        let elapsed = start.elapsed();
        info!(
            file = file_name,
            chunks = expected,
            strategy = ?self.strategy,
            elapsed_ms = elapsed.as_millis() as u64,
            "chunks merged"
        );

        Ok(MergeReport {
            chunks: expected,
            bytes: file_len,
            strategy: self.strategy,
            elapsed,
        })
    }

    /// Merge, then check the result against the source's hex SHA-256.
    ///
    /// On mismatch the reconstructed file is removed and the error is a
    /// [`TransferError::Verification`] for which
    /// [`is_integrity`](TransferError::is_integrity) holds.
    pub async fn rebuild_verified(
        &self,
        staging: &Path,
        file_name: &str,
        file_len: u64,
        expected_digest: &str,
        destination: &Path,
    ) -> Result<MergeReport> {
        let report = self.merge(staging, file_name, file_len, destination).await?;

        let path = destination.to_path_buf();
        let expected = expected_digest.to_string();
        let verified = tokio::task::spawn_blocking(move || {
            fleetcast_verify::verify_sha256_hex(&path, &expected)
        })
        .await
        .map_err(|_| TransferError::WorkerPanicked)?;

        if let Err(error) = verified {
            warn!(file = file_name, %error, "reconstructed artifact failed verification");
            if let Err(remove) = tokio::fs::remove_file(destination).await {
                warn!(path = %destination.display(), error = %remove, "could not remove unverified artifact");
            }
            return Err(error.into());
        }
        Ok(report)
    }

    async fn merge_sequential(
        &self,
        plan: &[ChunkDescriptor],
        found: &BTreeMap<u32, PathBuf>,
        destination: &Path,
    ) -> Result<()> {
        let mut out = tokio::fs::File::create(destination)
            .await
            .map_err(|e| TransferError::io(destination, e))?;
        let progress = TransferProgress::new(
            plan.last().map(ChunkDescriptor::end).unwrap_or_default(),
            self.options.on_progress.clone(),
        );

        for chunk in plan {
            let path = &found[&chunk.index];
            let mut input = tokio::fs::File::open(path)
                .await
                .map_err(|e| TransferError::io(path, e))?;
            tokio::io::copy(&mut input, &mut out)
                .await
                .map_err(|e| TransferError::io(destination, e))?;
            progress.advance(chunk.index, chunk.end());
        }

        out.sync_all().await.map_err(|e| TransferError::io(destination, e))
    }

    async fn merge_preallocated(
        &self,
        plan: Vec<ChunkDescriptor>,
        found: BTreeMap<u32, PathBuf>,
        file_len: u64,
        destination: &Path,
    ) -> Result<()> {
        let out = tokio::fs::File::create(destination)
            .await
            .map_err(|e| TransferError::io(destination, e))?;
        out.set_len(file_len)
            .await
            .map_err(|e| TransferError::io(destination, e))?;
        drop(out);

        let found = Arc::new(found);
        let destination = Arc::new(destination.to_path_buf());
        let progress = Arc::new(TransferProgress::new(file_len, self.options.on_progress.clone()));

        let dest = Arc::clone(&destination);
        ChunkPool::new(self.options.concurrency)
            .run(plan, move |chunk| {
                let found = Arc::clone(&found);
                let destination = Arc::clone(&dest);
                let progress = Arc::clone(&progress);
                async move {
                    let source = &found[&chunk.index];
                    let data = tokio::fs::read(source)
                        .await
                        .map_err(|e| TransferError::io(source, e))?;

                    let mut out = tokio::fs::OpenOptions::new()
                        .write(true)
                        .open(destination.as_path())
                        .await
                        .map_err(|e| TransferError::io(destination.as_path(), e))?;
                    out.seek(SeekFrom::Start(chunk.offset))
                        .await
                        .map_err(|e| TransferError::io(destination.as_path(), e))?;
                    out.write_all(&data)
                        .await
                        .map_err(|e| TransferError::io(destination.as_path(), e))?;
                    out.flush()
                        .await
                        .map_err(|e| TransferError::io(destination.as_path(), e))?;

                    progress.advance(chunk.index, chunk.end());
                    debug!(chunk = chunk.index, offset = chunk.offset, "chunk placed");
                    Ok(())
                }
            })
            .await?;

        let out = tokio::fs::OpenOptions::new()
            .write(true)
            .open(destination.as_path())
            .await
            .map_err(|e| TransferError::io(destination.as_path(), e))?;
        out.sync_all()
            .await
            .map_err(|e| TransferError::io(destination.as_path(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stage(dir: &Path, name: &str, data: &[u8], chunk_size: usize) {
        for (i, part) in data.chunks(chunk_size).enumerate() {
            std::fs::write(dir.join(format!("{name}.{i}")), part).unwrap();
        }
    }

    fn options(chunk_size: u64) -> TransferOptions {
        TransferOptions::default().chunk_size(chunk_size).concurrency(3)
    }

    #[tokio::test]
    async fn test_discover_sorts_numerically() {
        let dir = tempdir().unwrap();
        for name in ["app.jar.10", "app.jar.2", "app.jar.0", "app.jar.1", "app.jar.part", "other.0"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let found = discover_chunks(dir.path(), "app.jar").await.unwrap();
        assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 10]);
    }

    #[tokio::test]
    async fn test_both_strategies_rebuild_identical_bytes() {
        let dir = tempdir().unwrap();
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
        stage(dir.path(), "app.jar", &data, 512);

        for strategy in [MergeStrategy::Sequential, MergeStrategy::Preallocated] {
            let out = dir.path().join(format!("out-{strategy:?}"));
            let report = ChunkMerger::new(strategy, options(512))
                .merge(dir.path(), "app.jar", data.len() as u64, &out)
                .await
                .unwrap();
            assert_eq!(report.chunks, 10);
            assert_eq!(std::fs::read(&out).unwrap(), data);
        }
    }

    #[tokio::test]
    async fn test_missing_chunk_is_reported() {
        let dir = tempdir().unwrap();
        let data = vec![1u8; 2048];
        stage(dir.path(), "app.jar", &data, 512);
        std::fs::remove_file(dir.path().join("app.jar.2")).unwrap();

        let result = ChunkMerger::new(MergeStrategy::Preallocated, options(512))
            .merge(dir.path(), "app.jar", 2048, &dir.path().join("out"))
            .await;
        assert!(matches!(result, Err(TransferError::MissingChunk { index: 2 })));
    }

    #[tokio::test]
    async fn test_extra_chunk_is_reported() {
        let dir = tempdir().unwrap();
        stage(dir.path(), "app.jar", &[1u8; 1024], 512);
        std::fs::write(dir.path().join("app.jar.5"), b"stray").unwrap();

        let result = ChunkMerger::new(MergeStrategy::Sequential, options(512))
            .merge(dir.path(), "app.jar", 1024, &dir.path().join("out"))
            .await;
        assert!(matches!(result, Err(TransferError::UnexpectedChunk { index: 5 })));
    }

    #[tokio::test]
    async fn test_truncated_chunk_is_reported() {
        let dir = tempdir().unwrap();
        stage(dir.path(), "app.jar", &[1u8; 1024], 512);
        std::fs::write(dir.path().join("app.jar.0"), [1u8; 100]).unwrap();

        let result = ChunkMerger::new(MergeStrategy::Preallocated, options(512))
            .merge(dir.path(), "app.jar", 1024, &dir.path().join("out"))
            .await;
        assert!(matches!(
            result,
            Err(TransferError::LengthMismatch {
                expected: 512,
                actual: 100
            })
        ));
    }

    #[tokio::test]
    async fn test_rebuild_verified_discards_corrupt_result() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("stage");
        std::fs::create_dir(&staging).unwrap();

        let data = vec![9u8; 4096];
        let source = dir.path().join("app.jar");
        std::fs::write(&source, &data).unwrap();
        let digest = fleetcast_verify::sha256_file(&source).unwrap();

        let mut corrupt = data.clone();
        corrupt[3 * 512 + 10] ^= 0xff;
        stage(&staging, "app.jar", &corrupt, 512);

        let out = dir.path().join("rebuilt");
        let err = ChunkMerger::new(MergeStrategy::Preallocated, options(512))
            .rebuild_verified(&staging, "app.jar", 4096, &digest, &out)
            .await
            .unwrap_err();

        assert!(err.is_integrity());
        assert!(!out.exists());
    }
}
