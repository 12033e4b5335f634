//! Persistent key-value storage.
//!
//! `KeyValueStore` abstracts over the durable medium (SQLite, in-memory) and
//! stores raw strings per key. `PersistentStore` sits on top and reads/writes
//! typed values as JSON.

use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Trait for raw string slot storage.
///
/// Calls are synchronous from the caller's perspective.
pub trait KeyValueStore: Send + Sync {
    /// Get the raw value stored under `key`, `None` if the slot is empty.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove the slot. Removing an empty slot is not an error.
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// In-memory store, used by tests and by the `memory` storage backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
    #[cfg(test)]
    fail_reads: AtomicBool,
    #[cfg(test)]
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `get` calls fail with a backend error.
    #[cfg(test)]
    pub(crate) fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `set`/`remove` calls fail with a backend error.
    #[cfg(test)]
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn injected_failure(flag: &AtomicBool, op: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::backend(format!("memory store {op} failure")));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        #[cfg(test)]
        Self::injected_failure(&self.fail_reads, "read")?;
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        #[cfg(test)]
        Self::injected_failure(&self.fail_writes, "write")?;
        self.slots.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        #[cfg(test)]
        Self::injected_failure(&self.fail_writes, "write")?;
        self.slots.lock().remove(key);
        Ok(())
    }
}

/// Typed JSON adapter over a `KeyValueStore`.
///
/// Reads never fail: a missing slot, a backend error or a corrupt payload all
/// yield the caller's default. Writes report failures.
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore").finish_non_exhaustive()
    }
}

impl PersistentStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Read the value under `key`, or `default` when it is absent or unreadable.
    ///
    /// The default is not written back.
    pub fn read<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!("Store slot '{}' is empty, using default", key);
                return default;
            }
            Err(e) => {
                tracing::warn!("Failed to read store slot '{}': {}", key, e);
                return default;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Discarding corrupt payload in store slot '{}': {}", key, e);
                default
            }
        }
    }

    /// Serialize `value` as JSON and store it under `key`.
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        self.backend.set(key, &json)?;
        tracing::debug!("Wrote store slot '{}' ({} bytes)", key, json.len());
        Ok(())
    }

    /// Remove the slot under `key`.
    pub fn clear(&self, key: &str) -> StoreResult<()> {
        self.backend.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        name: String,
        value: i32,
    }

    fn store() -> (Arc<MemoryStore>, PersistentStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = PersistentStore::new(backend.clone());
        (backend, store)
    }

    #[test]
    fn test_read_missing_returns_default_without_writing() {
        let (backend, store) = store();
        let value: Vec<Entry> = store.read("entries", Vec::new());
        assert!(value.is_empty());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_write_then_read_preserves_order() {
        let (_, store) = store();
        let entries = vec![
            Entry { name: "b".into(), value: 2 },
            Entry { name: "a".into(), value: 1 },
            Entry { name: "c".into(), value: 3 },
        ];
        store.write("entries", &entries).unwrap();
        let read: Vec<Entry> = store.read("entries", Vec::new());
        assert_eq!(read, entries);
    }

    #[test]
    fn test_corrupt_payload_falls_back_to_default() {
        let (backend, store) = store();
        backend.set("entries", "{not json").unwrap();
        let read: Vec<Entry> = store.read("entries", Vec::new());
        assert!(read.is_empty());
    }

    #[test]
    fn test_wrong_shape_falls_back_to_default() {
        let (backend, store) = store();
        backend.set("entries", r#"{"name": "x"}"#).unwrap();
        let read: Vec<Entry> = store.read("entries", Vec::new());
        assert!(read.is_empty());
    }

    #[test]
    fn test_read_failure_falls_back_to_default() {
        let (backend, store) = store();
        store.write("entries", &vec![Entry { name: "a".into(), value: 1 }]).unwrap();
        backend.set_fail_reads(true);
        let read: Vec<Entry> = store.read("entries", Vec::new());
        assert!(read.is_empty());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let (backend, store) = store();
        backend.set_fail_writes(true);
        let result = store.write("entries", &Vec::<Entry>::new());
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_clear_removes_slot() {
        let (backend, store) = store();
        store.write("entries", &vec![1, 2, 3]).unwrap();
        store.clear("entries").unwrap();
        assert!(backend.is_empty());
        let read: Vec<i32> = store.read("entries", vec![9]);
        assert_eq!(read, vec![9]);
    }
}
