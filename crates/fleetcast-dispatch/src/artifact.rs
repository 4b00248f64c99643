use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{DispatchError, Result};

/// A source file that has been measured and hashed for distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path:      PathBuf,
    pub file_name: String,
    pub len:       u64,
    /// Hex SHA-256 of the whole file.
    pub digest:    String,
}

impl Artifact {
    /// Stat and hash `path`. Empty files are rejected.
    pub async fn inspect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let artifact_err = |source| DispatchError::Artifact {
            path: path.clone(),
            source,
        };

        let metadata = tokio::fs::metadata(&path).await.map_err(artifact_err)?;
        if !metadata.is_file() {
            return Err(artifact_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        if metadata.len() == 0 {
            return Err(DispatchError::EmptyArtifact(path.clone()));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                artifact_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))
            })?;

        let hashed = path.clone();
        let digest = tokio::task::spawn_blocking(move || fleetcast_verify::sha256_file(&hashed))
            .await
            .map_err(|e| DispatchError::Join(e.to_string()))??;

        Ok(Self {
            path,
            file_name,
            len: metadata.len(),
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_inspect() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let artifact = Artifact::inspect(&path).await.unwrap();
        assert_eq!(artifact.file_name, "hello.txt");
        assert_eq!(artifact.len, 11);
        assert_eq!(
            artifact.digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_and_missing() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();

        assert!(matches!(
            Artifact::inspect(&empty).await,
            Err(DispatchError::EmptyArtifact(_))
        ));
        assert!(matches!(
            Artifact::inspect(dir.path().join("missing")).await,
            Err(DispatchError::Artifact { .. })
        ));
        assert!(matches!(
            Artifact::inspect(dir.path()).await,
            Err(DispatchError::Artifact { .. })
        ));
    }
}
