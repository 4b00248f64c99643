use std::future::Future;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use fleetcast_fs::Workspace;

use crate::data::{ChunkDescriptor, staged_name};

/// Destination for individually addressable chunks.
///
/// Implementations must accept chunks in any order and from several workers
/// at once; each chunk is written exactly once per transfer.
pub trait ChunkSink: Send + Sync {
    /// Error type for chunk writes.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist one chunk.
    fn write_chunk(
        &self,
        chunk: &ChunkDescriptor,
        data: Bytes,
    ) -> impl Future<Output = std::result::Result<(), Self::Error>> + Send;
}

/// Stages chunks as `<file_name>.<index>` files in a private directory.
///
/// The directory is a [`Workspace`]: it is deleted when the `StagingDir` is
/// dropped, unless it was handed off with [`keep`](StagingDir::keep).
#[derive(Debug)]
pub struct StagingDir {
    workspace: Workspace,
    file_name: String,
}

impl StagingDir {
    pub fn new(workspace: Workspace, file_name: impl Into<String>) -> Self {
        Self {
            workspace,
            file_name: file_name.into(),
        }
    }

    /// Create (or adopt) `dir` as the staging area.
    pub fn create(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> fleetcast_fs::Result<Self> {
        Ok(Self::new(Workspace::new(dir)?, file_name))
    }

    pub fn path(&self) -> &Path { self.workspace.path() }

    pub fn file_name(&self) -> &str { &self.file_name }

    pub fn chunk_path(&self, index: u32) -> PathBuf {
        self.workspace.file(staged_name(&self.file_name, index))
    }

    /// Keep the staged chunks on disk and return their directory.
    pub fn keep(self) -> PathBuf { self.workspace.into_path() }
}

impl ChunkSink for StagingDir {
    type Error = fleetcast_fs::Error;

    async fn write_chunk(&self, chunk: &ChunkDescriptor, data: Bytes) -> fleetcast_fs::Result<()> {
        let path = self.chunk_path(chunk.index);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|source| fleetcast_fs::Error::Write { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_staging_dir_writes_named_chunks() {
        let dir = tempdir().unwrap();
        let staging = StagingDir::create(dir.path().join("session"), "app.jar").unwrap();
        let chunk = ChunkDescriptor {
            index: 7,
            offset: 7 * 4,
            len: 4,
        };

        staging.write_chunk(&chunk, Bytes::from_static(b"abcd")).await.unwrap();

        assert_eq!(std::fs::read(staging.chunk_path(7)).unwrap(), b"abcd");
        assert!(staging.chunk_path(7).ends_with("app.jar.7"));
    }

    #[tokio::test]
    async fn test_staging_dir_removed_on_drop() {
        let dir = tempdir().unwrap();
        let session = dir.path().join("session");
        {
            let staging = StagingDir::create(&session, "app.jar").unwrap();
            let chunk = ChunkDescriptor {
                index: 0,
                offset: 0,
                len: 1,
            };
            staging.write_chunk(&chunk, Bytes::from_static(b"x")).await.unwrap();
        }
        assert!(!session.exists());
    }
}
