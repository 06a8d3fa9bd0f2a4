//! Safe file I/O primitives for persisted state.
//!
//! - [`atomic_write`]: `NamedTempFile` in the destination directory, fsync,
//!   then rename over the destination. A crash at any point leaves either the
//!   previous file or the new one, never a torn write.
//! - [`write_new`]: same protocol, but refuses to replace an existing file.
//!   Used for append-only records.
//! - [`read_bounded`]: size-checked read so a replaced file cannot exhaust
//!   memory during deserialization.
//! - [`TenantLock`]: exclusive advisory lock held for the duration of a
//!   read-modify-write cycle.
//!
//! Symlinks at destinations are refused.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::error::BundleError;

/// Reject a symlink at `path`. A missing path is fine.
pub fn reject_symlink(path: &Path) -> Result<(), BundleError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(BundleError::Storage {
            detail: format!("refusing to operate on symlink at {}", path.display()),
        }),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BundleError::storage(
            format_args!("cannot stat {}", path.display()),
            e,
        )),
    }
}

/// Create `dir` (and parents) if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), BundleError> {
    fs::create_dir_all(dir)
        .map_err(|e| BundleError::storage(format_args!("cannot create {}", dir.display()), e))
}

fn staged(final_path: &Path, bytes: &[u8]) -> Result<NamedTempFile, BundleError> {
    let dir = final_path.parent().ok_or_else(|| BundleError::Storage {
        detail: format!("{} has no parent directory", final_path.display()),
    })?;
    ensure_dir(dir)?;
    reject_symlink(final_path)?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| {
        BundleError::storage(format_args!("cannot create temp file in {}", dir.display()), e)
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| BundleError::storage("cannot set permissions on temp file", e))?;
    }

    temp.as_file_mut()
        .write_all(bytes)
        .map_err(|e| BundleError::storage("cannot write temp file", e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| BundleError::storage("cannot sync temp file", e))?;
    Ok(temp)
}

/// Atomically replace `final_path` with `bytes`.
pub fn atomic_write(final_path: &Path, bytes: &[u8]) -> Result<(), BundleError> {
    let temp = staged(final_path, bytes)?;
    temp.persist(final_path).map_err(|e| {
        BundleError::storage(
            format_args!("cannot persist temp file -> {}", final_path.display()),
            e.error,
        )
    })?;
    Ok(())
}

/// Atomically create `final_path` with `bytes`; fails if it already exists.
pub fn write_new(final_path: &Path, bytes: &[u8]) -> Result<(), BundleError> {
    let temp = staged(final_path, bytes)?;
    temp.persist_noclobber(final_path).map_err(|e| {
        BundleError::storage(
            format_args!("refusing to overwrite {}", final_path.display()),
            e.error,
        )
    })?;
    Ok(())
}

/// Read a file of at most `max_len` bytes. `Ok(None)` if it does not exist.
pub fn read_bounded(path: &Path, max_len: u64) -> Result<Option<Vec<u8>>, BundleError> {
    reject_symlink(path)?;
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(BundleError::storage(
                format_args!("cannot open {}", path.display()),
                e,
            ));
        },
    };
    let mut buf = Vec::new();
    // Read one byte past the limit so oversize files are detected without
    // trusting metadata.
    file.take(max_len + 1)
        .read_to_end(&mut buf)
        .map_err(|e| BundleError::storage(format_args!("cannot read {}", path.display()), e))?;
    if buf.len() as u64 > max_len {
        return Err(BundleError::Storage {
            detail: format!("{} exceeds {max_len} bytes", path.display()),
        });
    }
    Ok(Some(buf))
}

/// Exclusive advisory lock on a lock file; released on drop.
#[derive(Debug)]
pub struct TenantLock {
    file: File,
    path: PathBuf,
}

impl TenantLock {
    /// Block until the exclusive lock on `path` is held.
    pub fn acquire(path: &Path) -> Result<Self, BundleError> {
        if let Some(dir) = path.parent() {
            ensure_dir(dir)?;
        }
        reject_symlink(path)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| BundleError::storage(format_args!("cannot open {}", path.display()), e))?;
        file.lock_exclusive()
            .map_err(|e| BundleError::storage(format_args!("cannot lock {}", path.display()), e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for TenantLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}
