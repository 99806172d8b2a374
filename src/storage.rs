//! Key-value persistence collaborator.
//! The store treats this as durable and linearizable per call, but not
//! transactional across slots; every mutation computes the full new value in
//! memory and issues a single `set`.

use crate::error::{QuotaExceeded, StoreError, StoreResult};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Default capacity, matching a browser-local storage area.
pub const DEFAULT_CAPACITY_BYTES: u64 = 10 * 1024 * 1024;

/// Named-slot key-value storage. `set` rejects writes that would push the
/// total footprint past `capacity` with a storage-full quota error.
pub trait KvStore {
    fn get(&self, slot: &str) -> StoreResult<Option<Value>>;
    fn set(&mut self, slot: &str, value: &Value) -> StoreResult<()>;
    fn remove(&mut self, slots: &[&str]) -> StoreResult<()>;
    fn bytes_in_use(&self) -> StoreResult<u64>;
    fn capacity(&self) -> u64;
}

/// File-backed store: one JSON document per slot under the notes directory.
pub struct FileStore {
    dir: PathBuf,
    capacity: u64,
}

impl FileStore {
    pub fn open(dir: &Path) -> StoreResult<Self> {
        let capacity = std::env::var("SNIP_NOTES_CAPACITY_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CAPACITY_BYTES);
        Self::with_capacity(dir, capacity)
    }

    pub fn with_capacity(dir: &Path, capacity: u64) -> StoreResult<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        Ok(Self { dir: dir.to_path_buf(), capacity })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{slot}.json"))
    }

    fn slot_size(&self, slot: &str) -> u64 {
        fs::metadata(self.slot_path(slot)).map(|m| m.len()).unwrap_or(0)
    }
}

impl KvStore for FileStore {
    fn get(&self, slot: &str) -> StoreResult<Option<Value>> {
        let path = self.slot_path(slot);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let value = serde_json::from_str(&raw).map_err(|e| {
            StoreError::Persistence(format!(
                "slot {slot} holds invalid JSON: {e}"
            ))
        })?;
        Ok(Some(value))
    }

    fn set(&mut self, slot: &str, value: &Value) -> StoreResult<()> {
        let encoded = serde_json::to_string(value).map_err(|e| {
            StoreError::Persistence(format!("cannot encode slot {slot}: {e}"))
        })?;
        let projected = self.bytes_in_use()? - self.slot_size(slot)
            + encoded.len() as u64;
        if projected > self.capacity {
            return Err(QuotaExceeded::StorageFull {
                projected,
                capacity: self.capacity,
            }
            .into());
        }
        fs::write(self.slot_path(slot), encoded)?;
        Ok(())
    }

    fn remove(&mut self, slots: &[&str]) -> StoreResult<()> {
        for slot in slots {
            let path = self.slot_path(slot);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn bytes_in_use(&self) -> StoreResult<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.path().extension().and_then(|s| s.to_str())
                    == Some("json")
            {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_get_absent_slot() {
        let tmp = tempdir().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(store.get("notes").unwrap().is_none());
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let tmp = tempdir().unwrap();
        let mut store = FileStore::open(tmp.path()).unwrap();
        store.set("notes", &json!([{"id": 1}])).unwrap();
        let value = store.get("notes").unwrap().unwrap();
        assert_eq!(value[0]["id"], 1);
    }

    #[test]
    fn test_set_rejects_write_over_capacity() {
        let tmp = tempdir().unwrap();
        let mut store = FileStore::with_capacity(tmp.path(), 32).unwrap();
        let big = json!({"text": "x".repeat(100)});
        let err = store.set("notes", &big).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Quota(QuotaExceeded::StorageFull { .. })
        ));
        assert!(store.get("notes").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_counts_replaced_slot_once() {
        let tmp = tempdir().unwrap();
        let mut store = FileStore::with_capacity(tmp.path(), 64).unwrap();
        let doc = json!({"text": "x".repeat(40)});
        store.set("notes", &doc).unwrap();
        // Rewriting the same slot must not double-count its old size.
        store.set("notes", &doc).unwrap();
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tmp = tempdir().unwrap();
        let mut store = FileStore::open(tmp.path()).unwrap();
        store.set("key", &json!({"key": "abc"})).unwrap();
        store.remove(&["key", "never-existed"]).unwrap();
        assert!(store.get("key").unwrap().is_none());
        store.remove(&["key"]).unwrap();
    }

    #[test]
    fn test_bytes_in_use_tracks_slots() {
        let tmp = tempdir().unwrap();
        let mut store = FileStore::open(tmp.path()).unwrap();
        assert_eq!(store.bytes_in_use().unwrap(), 0);
        store.set("notes", &json!([])).unwrap();
        assert!(store.bytes_in_use().unwrap() > 0);
    }
}
