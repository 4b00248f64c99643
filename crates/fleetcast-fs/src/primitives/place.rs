use crate::{Error, Result};
use std::fs;
use std::path::Path;

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::create_dir_all(path).map_err(|e| Error::CreateDir {
        path:   path.to_path_buf(),
        source: e,
    })
}

/// Move a verified file to its final location.
///
/// The parent of `dest` is created if needed and an existing file is replaced.
pub fn promote(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let src = src.as_ref();
    let dest = dest.as_ref();

    let parent = dest
        .parent()
        .ok_or_else(|| Error::NoParent(dest.to_path_buf()))?;
    ensure_dir(parent)?;

    fs::rename(src, dest).map_err(|e| Error::Rename {
        from:   src.to_path_buf(),
        to:     dest.to_path_buf(),
        source: e,
    })
}

/// Remove every entry inside `dir`, keeping the directory itself.
///
/// A missing directory counts as already clear.
pub fn clear_dir(dir: impl AsRef<Path>) -> Result<usize> {
    let dir = dir.as_ref();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(Error::Read {
                path:   dir.to_path_buf(),
                source: e,
            });
        }
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Read {
            path:   dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| Error::Remove { path, source: e })?;
        removed += 1;
    }

    Ok(removed)
}
