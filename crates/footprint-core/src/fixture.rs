//! Sized file fixtures
//!
//! Creates files of an exact decimal-kilobyte size and removes paths on a
//! best-effort basis. Used by tests and by resources that need deterministic
//! data on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::report::BYTES_IN_KB;

const WRITE_CHUNK: usize = 64 * 1024;

/// A file to materialize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureRequest {
    /// Absolute path of the file
    pub path: PathBuf,

    /// Size in decimal kilobytes
    pub size_in_kb: u64,
}

impl FixtureRequest {
    /// Describe a file of `size_in_kb` kilobytes at `path`
    pub fn new(path: impl Into<PathBuf>, size_in_kb: u64) -> Self {
        Self {
            path: path.into(),
            size_in_kb,
        }
    }

    /// Size in bytes, or an `InvalidInput` error when it does not fit in a `u64`
    pub fn size_in_bytes(&self) -> Result<u64> {
        fixture_bytes(self.size_in_kb)
    }

    /// Write the file
    pub async fn create(&self) -> Result<()> {
        create_sized_file(&self.path, self.size_in_kb).await
    }
}

/// What `remove_path` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The path was deleted
    Removed,
    /// Nothing existed at the path
    Absent,
    /// The path is held open elsewhere and was left in place
    Deferred,
}

/// Write a zero-filled file of exactly `size_in_kb * 1000` bytes.
///
/// Parent directories must already exist.
pub async fn create_sized_file(path: impl AsRef<Path>, size_in_kb: u64) -> Result<()> {
    let path = path.as_ref();
    ensure_absolute(path)?;

    let mut remaining = fixture_bytes(size_in_kb)?;
    let mut file = tokio::fs::File::create(path).await?;
    let chunk = vec![0u8; WRITE_CHUNK];

    while remaining > 0 {
        let len = remaining.min(WRITE_CHUNK as u64) as usize;
        file.write_all(&chunk[..len]).await?;
        remaining -= len as u64;
    }
    file.flush().await?;

    debug!("Created {} KB fixture at {:?}", size_in_kb, path);
    Ok(())
}

/// Remove a file or directory tree.
///
/// A missing path is success. A path held open by another process or handle is
/// logged and left for the surrounding environment to clean up. Any other IO
/// error is returned.
pub async fn remove_path(path: impl AsRef<Path>) -> Result<RemoveOutcome> {
    let path = path.as_ref();
    ensure_absolute(path)?;

    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RemoveOutcome::Absent),
        Err(e) => return Err(e.into()),
    };

    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    removal_outcome(path, removed)
}

/// Classify the result of a removal attempt
fn removal_outcome(path: &Path, removed: std::io::Result<()>) -> Result<RemoveOutcome> {
    match removed {
        Ok(()) => {
            debug!("Removed {:?}", path);
            Ok(RemoveOutcome::Removed)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(RemoveOutcome::Absent),
        Err(e) if is_lock_contention(&e) => {
            warn!("Leaving locked path {:?} in place: {}", path, e);
            Ok(RemoveOutcome::Deferred)
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether an IO error means the target is held open elsewhere
pub fn is_lock_contention(err: &std::io::Error) -> bool {
    if matches!(
        err.kind(),
        ErrorKind::ResourceBusy | ErrorKind::ExecutableFileBusy
    ) {
        return true;
    }

    // ERROR_SHARING_VIOLATION and ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    if matches!(err.raw_os_error(), Some(32) | Some(33)) {
        return true;
    }

    false
}

fn fixture_bytes(size_in_kb: u64) -> Result<u64> {
    size_in_kb.checked_mul(BYTES_IN_KB).ok_or_else(|| {
        std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("fixture size of {} KB overflows a byte count", size_in_kb),
        )
        .into()
    })
}

fn ensure_absolute(path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(Error::relative_path(path.display().to_string()))
    }
}
