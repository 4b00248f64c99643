use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};

use crate::{Result, ensure_dir};

/// A staging directory that is removed on drop unless kept.
///
/// Chunk files of one delivery attempt live in their own workspace, so a
/// failed or rejected transfer never leaves orphaned chunks behind.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Create the directory (or adopt it if it already exists).
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let path = root.into();
        ensure_dir(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn file(&self, name: impl AsRef<Path>) -> PathBuf { self.path.join(name) }

    /// Disarm cleanup and hand back the directory.
    pub fn into_path(self) -> PathBuf {
        let this = ManuallyDrop::new(self);
        this.path.clone()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_workspace_cleanup_on_drop() -> Result<()> {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        {
            let workspace = Workspace::new(&staging)?;
            std::fs::write(workspace.file("app.jar.0"), "data").unwrap();
            assert!(staging.exists());
        }
        assert!(!staging.exists());
        Ok(())
    }

    #[test]
    fn test_workspace_into_path_keeps_files() -> Result<()> {
        let dir = tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("keep"))?;
        std::fs::write(workspace.file("app.jar.0"), "data").unwrap();
        let kept = workspace.into_path();
        assert!(kept.join("app.jar.0").exists());
        Ok(())
    }

    #[test]
    fn test_workspace_adopts_existing_dir() -> Result<()> {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("session");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("app.jar.3"), "chunk").unwrap();

        let workspace = Workspace::new(&staging)?;
        assert!(workspace.file("app.jar.3").exists());
        drop(workspace);
        assert!(!staging.exists());
        Ok(())
    }
}
