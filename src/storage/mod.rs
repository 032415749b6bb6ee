//! Small key/value persistence layer.
//!
//! Durable state (the cursor table in particular) goes through the
//! [`KeyValueStore`] trait so that tests can swap the file-backed
//! implementation for [`MemoryStore`]. Every file write goes through
//! [`write_atomic`], so a crash mid-write never leaves a truncated file behind.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Minimal string key/value storage.
///
/// Implementations assume a single writer per process.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`. Returns `true` if it was present.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Removes every key.
    fn clear(&self) -> Result<(), StorageError>;
}

/// Writes `contents` to `path` atomically.
///
/// Creates the parent directory if needed, writes to a `.tmp` sibling,
/// fsyncs, then renames over the destination.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    write_atomic_with(path, contents, OpenOptions::new())
}

/// Like [`write_atomic`], but on unix the file is created `0600` so its
/// content is never readable by other users, not even mid-write.
pub fn write_atomic_private(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut opts = OpenOptions::new();

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }

    write_atomic_with(path, contents, opts)
}

fn write_atomic_with(
    path: &Path,
    contents: &[u8],
    mut opts: OpenOptions,
) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let tmp_path = path.with_extension("tmp");
    // A leftover temp file would keep its old mode
    remove_file_if_exists(&tmp_path)?;
    {
        let mut tmp_file = opts
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .map_err(|e| StorageError::io(&tmp_path, e))?;
        tmp_file
            .write_all(contents)
            .map_err(|e| StorageError::io(&tmp_path, e))?;
        tmp_file
            .sync_all()
            .map_err(|e| StorageError::io(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path, e))?;
    Ok(())
}

/// Removes `path`, treating "already gone" as success.
///
/// Returns `true` if a file was actually deleted.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Persistence errors
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// The file could not be read, written or removed
    Io { path: String, message: String },
    /// The file was readable but its content is not valid
    Corrupted { path: String, reason: String },
    /// Encrypting or decrypting the content failed
    Crypto(String),
}

impl StorageError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn corrupted(path: &Path, reason: impl Into<String>) -> Self {
        StorageError::Corrupted {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io { path, message } => write!(f, "I/O error on {}: {}", path, message),
            StorageError::Corrupted { path, reason } => {
                write!(f, "Corrupted content in {}: {}", path, reason)
            }
            StorageError::Crypto(msg) => write!(f, "Encryption error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}
