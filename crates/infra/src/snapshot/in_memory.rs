use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{SnapshotError, SnapshotStore};

/// In-memory snapshot store for tests/dev. Counts writes so tests can assert
/// that a clean persist tick wrote nothing.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SnapshotError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SnapshotError::Unavailable("lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), SnapshotError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SnapshotError::Unavailable("lock poisoned".to_string()))?;
        entries.insert(key.to_string(), bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SnapshotError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SnapshotError::Unavailable("lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}
