//! Flat JSON object file, one entry per key.
//!
//! The file stays human-readable (`{"inbox": "...", "sentItems": "..."}`) and
//! can be deleted by hand at any time; a missing file reads as empty.

use super::{remove_file_if_exists, write_atomic, KeyValueStore, StorageError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// [`KeyValueStore`] backed by a single JSON file.
///
/// Every operation re-reads the file; nothing is cached between calls.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&contents)
            .map_err(|e| StorageError::corrupted(&self.path, e.to_string()))
    }

    fn write_table(&self, table: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(table)
            .map_err(|e| StorageError::corrupted(&self.path, e.to_string()))?;
        write_atomic(&self.path, json.as_bytes())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_table()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut table = match self.read_table() {
            Ok(table) => table,
            // Unparseable entries are lost already; start a fresh table
            Err(StorageError::Corrupted { reason, .. }) => {
                warn!(
                    path = %self.path.display(),
                    reason = %reason,
                    "Replacing corrupted key/value file"
                );
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        table.insert(key.to_string(), value.to_string());
        self.write_table(&table)
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut table = self.read_table()?;
        if table.remove(key).is_none() {
            return Ok(false);
        }
        self.write_table(&table)?;
        Ok(true)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap();
        remove_file_if_exists(&self.path)?;
        Ok(())
    }
}
