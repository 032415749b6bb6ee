use crate::storage::{JsonFileStore, KeyValueStore, MemoryStore, StorageError};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Resource key -> delta cursor table.
///
/// Cursors are stored exactly as the server issued them and never parsed.
/// Nothing is cached here: every call goes to the backing store.
#[derive(Clone)]
pub struct CursorStore {
    backend: Arc<dyn KeyValueStore>,
}

impl CursorStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Cursor table kept in a JSON file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self::new(Arc::new(JsonFileStore::new(path)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn get(&self, resource: &str) -> Result<Option<String>, StorageError> {
        self.backend.get(resource)
    }

    pub fn set(&self, resource: &str, cursor: &str) -> Result<(), StorageError> {
        self.backend.set(resource, cursor)?;
        debug!(resource = %resource, "Cursor saved");
        Ok(())
    }

    /// Forgets one resource's cursor, or every cursor when `resource` is `None`.
    pub fn reset(&self, resource: Option<&str>) -> Result<(), StorageError> {
        match resource {
            Some(resource) => {
                let removed = self.backend.delete(resource)?;
                debug!(resource = %resource, removed, "Cursor reset");
            }
            None => {
                self.backend.clear()?;
                debug!("All cursors reset");
            }
        }
        Ok(())
    }
}
