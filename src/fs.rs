//! File helpers shared by the credential cache and the profile store.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use fd_lock::RwLock as FdRwLock;
use tempfile::NamedTempFile;
use tracing::trace;

use crate::error::{Error, Result};

/// Replace `path` with `contents` through a temp file in the same directory and a rename,
/// so readers never observe a half-written file.
///
/// A symlinked `path` is followed, so the link survives and its target is updated.
pub fn write_atomic(path: &Path, contents: &str, private: bool) -> Result<()> {
    let resolved = resolve_symlinks(path)?;
    let path = resolved.as_path();
    let parent = parent_dir(path);
    fs::create_dir_all(&parent)
        .map_err(|e| Error::io("Failed to create directory", &parent, e))?;

    let mut tmp = NamedTempFile::new_in(&parent)
        .map_err(|e| Error::io("Failed to create temporary file in", &parent, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| Error::io("Failed to write temporary file for", path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Keep the target's mode unless the file holds secrets.
        let mode = if private {
            0o600
        } else {
            fs::metadata(path)
                .map(|m| m.permissions().mode())
                .unwrap_or(0o644)
        };
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))
            .map_err(|e| Error::io("Failed to set permissions on", path, e))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    tmp.persist(path)
        .map_err(|e| Error::io("Failed to replace", path, e.error))?;
    trace!("Rewrote {}", path.display());
    Ok(())
}

/// Run `f` while holding an exclusive advisory lock on `lock_path`.
pub fn with_exclusive_lock<T>(lock_path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let parent = parent_dir(lock_path);
    fs::create_dir_all(&parent)
        .map_err(|e| Error::io("Failed to create directory", &parent, e))?;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(|e| Error::io("Failed to open lock file", lock_path, e))?;
    let mut lock = FdRwLock::new(file);
    let _guard = lock
        .write()
        .map_err(|e| Error::io("Failed to lock", lock_path, e))?;
    trace!("Acquired lock {}", lock_path.display());

    f()
}

/// Read a file that may not exist yet.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io("Failed to read", path, e)),
    }
}

/// Create an empty file if none exists. Existing content is left alone.
pub fn touch(path: &Path) -> Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent)
        .map_err(|e| Error::io("Failed to create directory", &parent, e))?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_: File| ())
        .map_err(|e| Error::io("Failed to create", path, e))
}

// A missing file is written where it was asked for
fn resolve_symlinks(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(real) => Ok(real),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(e) => Err(Error::io("Failed to resolve", path, e)),
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
