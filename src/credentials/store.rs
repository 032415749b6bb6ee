//! Durable home of the serialized credential cache.
//!
//! The blob is validated as a unit on load (it must be JSON once any
//! encryption envelope is removed) and written with [`write_atomic_private`]
//! on save, so the file is owner-only from the moment it exists.

use super::{CacheBlob, CacheCipher};
use crate::storage::{remove_file_if_exists, write_atomic_private, StorageError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

enum Backend {
    File(PathBuf),
    Memory(Mutex<Option<String>>),
}

/// Loads and saves the credential cache blob.
///
/// Assumes a single writer per process. Two processes saving concurrently
/// cannot corrupt the file, but the last rename wins.
pub struct CredentialStore {
    backend: Backend,
    cipher: Option<CacheCipher>,
}

impl CredentialStore {
    /// File-backed store at `path`. The file and its directory are created on
    /// the first non-empty save.
    pub fn open<P: AsRef<Path>>(path: P, cipher: Option<CacheCipher>) -> Self {
        Self {
            backend: Backend::File(path.as_ref().to_path_buf()),
            cipher,
        }
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(None)),
            cipher: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File(path) => Some(path),
            Backend::Memory(_) => None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Reads the persisted cache. A missing file yields an empty blob;
    /// unreadable or invalid content is an error.
    pub fn load(&self) -> Result<CacheBlob, StorageError> {
        let raw = match &self.backend {
            Backend::File(path) => match fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "No credential cache on disk");
                    return Ok(CacheBlob::empty());
                }
                Err(e) => return Err(StorageError::io(path, e)),
            },
            Backend::Memory(slot) => match slot.lock().unwrap().clone() {
                Some(contents) => contents,
                None => return Ok(CacheBlob::empty()),
            },
        };

        if raw.trim().is_empty() {
            return Ok(CacheBlob::empty());
        }

        let plain = match &self.cipher {
            Some(cipher) => cipher.open(&raw)?,
            None => raw,
        };

        if let Err(e) = serde_json::from_str::<serde_json::Value>(&plain) {
            return Err(StorageError::Corrupted {
                path: self.describe(),
                reason: e.to_string(),
            });
        }

        Ok(CacheBlob::new(plain))
    }

    /// Persists `blob`. Returns `false` (and leaves any existing cache
    /// untouched) when the blob is semantically empty.
    pub fn save(&self, blob: &CacheBlob) -> Result<bool, StorageError> {
        if blob.is_empty() {
            debug!("Skipping save of empty credential cache");
            return Ok(false);
        }

        let contents = match &self.cipher {
            Some(cipher) => cipher.seal(blob.as_str())?,
            None => blob.as_str().to_string(),
        };

        match &self.backend {
            Backend::File(path) => {
                write_atomic_private(path, contents.as_bytes())?;
                debug!(path = %path.display(), bytes = contents.len(), "Credential cache saved");
            }
            Backend::Memory(slot) => {
                *slot.lock().unwrap() = Some(contents);
            }
        }
        Ok(true)
    }

    /// Deletes the persisted cache. Returns `true` if something was removed.
    pub fn clear(&self) -> Result<bool, StorageError> {
        match &self.backend {
            Backend::File(path) => remove_file_if_exists(path),
            Backend::Memory(slot) => Ok(slot.lock().unwrap().take().is_some()),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            Backend::File(path) => path.display().to_string(),
            Backend::Memory(_) => "<memory>".to_string(),
        }
    }
}
