//! Key lifecycle: exactly one active key, at most one retired legacy key.
//! The legacy key exists only to migrate old notes forward and is discarded
//! once a migration pass completes.

use crate::error::{StoreError, StoreResult};
use crate::storage::KvStore;
use base64::{Engine as _, engine::general_purpose};
use chrono::Local;
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, OnceLock};
use zeroize::Zeroize;

pub const KEY_LEN: usize = 32;

/// Slot holding the versioned active-key record.
pub(crate) const ACTIVE_KEY_SLOT: &str = "key";
/// Slot used before key versioning existed. Its presence implies a pending
/// migration; it is removed after the migration pass completes.
pub(crate) const LEGACY_KEY_SLOT: &str = "encryption_key";

const KEY_ID_WIDTH: usize = 9;

/// A symmetric key plus its version identifier. Legacy keys have no id.
pub struct Key {
    bytes: [u8; KEY_LEN],
    id: Option<String>,
}

impl Key {
    fn generate(id: String) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes, id: Some(id) }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN], id: Option<&str>) -> Self {
        Self { bytes, id: id.map(|s| s.to_string()) }
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs.
        f.debug_struct("Key").field("id", &self.id).finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct KeyRecord {
    key: String,
    #[serde(rename = "keyId", default, skip_serializing_if = "Option::is_none")]
    key_id: Option<String>,
}

impl KeyRecord {
    fn from_key(key: &Key) -> Self {
        Self {
            key: general_purpose::STANDARD.encode(key.bytes),
            key_id: key.id.clone(),
        }
    }

    fn into_key(self) -> StoreResult<Key> {
        let mut decoded =
            general_purpose::STANDARD.decode(self.key.trim()).map_err(|e| {
                StoreError::KeyUnavailable(format!("bad key encoding: {e}"))
            })?;
        if decoded.len() != KEY_LEN {
            decoded.zeroize();
            return Err(StoreError::KeyUnavailable(format!(
                "expected {KEY_LEN}-byte key, found {}",
                decoded.len()
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Key { bytes, id: self.key_id })
    }
}

/// Owns the active key and, across a rotation boundary, the retired one.
#[derive(Debug)]
pub struct KeyStore {
    active: Key,
    legacy: Option<Key>,
}

impl KeyStore {
    /// Load or create the active key, then look for a pre-versioning legacy
    /// record. Idempotent: a second call without a rotation in between
    /// yields the same active key.
    pub fn initialize(kv: &mut dyn KvStore) -> StoreResult<Self> {
        let active = match kv.get(ACTIVE_KEY_SLOT)? {
            Some(value) => parse_key_record(value)?.into_key()?,
            None => {
                let key = Key::generate(fresh_key_id());
                persist_active(kv, &key)?;
                tracing::info!(key_id = key.id().unwrap_or(""), "generated new active key");
                key
            }
        };
        if active.id.is_none() {
            return Err(StoreError::KeyUnavailable(
                "active key record has no key id".to_string(),
            ));
        }

        let legacy = match kv.get(LEGACY_KEY_SLOT)? {
            Some(value) => {
                let mut key = parse_legacy_record(value)?.into_key()?;
                // A key in the legacy slot is legacy regardless of any
                // stray id the record may carry.
                key.id = None;
                tracing::info!("legacy key found; migration pending");
                Some(key)
            }
            None => None,
        };

        Ok(Self { active, legacy })
    }

    /// Generate and persist a new active key; the previous one becomes the
    /// in-memory legacy key for the duration of the migration pass.
    pub fn rotate(&mut self, kv: &mut dyn KvStore) -> StoreResult<()> {
        let next = Key::generate(fresh_key_id());
        persist_active(kv, &next)?;
        let mut retired = std::mem::replace(&mut self.active, next);
        retired.id = None;
        self.legacy = Some(retired);
        tracing::info!(
            key_id = self.active.id().unwrap_or(""),
            "rotated active key"
        );
        Ok(())
    }

    /// Forget the legacy key and drop its persisted record, if any.
    pub fn drop_legacy(&mut self, kv: &mut dyn KvStore) -> StoreResult<()> {
        self.legacy = None;
        kv.remove(&[LEGACY_KEY_SLOT])
    }

    pub fn active(&self) -> &Key {
        &self.active
    }

    pub fn legacy(&self) -> Option<&Key> {
        self.legacy.as_ref()
    }

    /// The active key's id. Always present: `initialize` refuses id-less
    /// active records.
    pub fn active_id(&self) -> &str {
        self.active.id().unwrap_or("")
    }
}

fn persist_active(kv: &mut dyn KvStore, key: &Key) -> StoreResult<()> {
    let record = serde_json::to_value(KeyRecord::from_key(key))
        .map_err(|e| StoreError::KeyUnavailable(e.to_string()))?;
    kv.set(ACTIVE_KEY_SLOT, &record)
}

fn parse_key_record(value: Value) -> StoreResult<KeyRecord> {
    serde_json::from_value(value).map_err(|e| {
        StoreError::KeyUnavailable(format!("unreadable key record: {e}"))
    })
}

/// Pre-versioning records were written either as a bare base64 string or as
/// an object with only a `key` field.
fn parse_legacy_record(value: Value) -> StoreResult<KeyRecord> {
    match value {
        Value::String(key) => Ok(KeyRecord { key, key_id: None }),
        other => parse_key_record(other),
    }
}

/// Fresh monotonic key identifier, derived from the current time. Strictly
/// increasing within a process so an immediate rotate never reuses an id.
fn fresh_key_id() -> String {
    static LAST: OnceLock<Mutex<i64>> = OnceLock::new();
    let last = LAST.get_or_init(|| Mutex::new(0));
    let mut guard = last.lock().unwrap();
    let now = Local::now().timestamp_micros();
    let ts = if now <= *guard { *guard + 1 } else { now };
    *guard = ts;
    encode_base62_width(ts.max(0) as u64, KEY_ID_WIDTH)
}

fn encode_base62(num: u64) -> String {
    const ALPHABET: &[u8] =
        b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    if num == 0 {
        return "0".to_string();
    }
    let mut n = num;
    let base = ALPHABET.len() as u64;
    let mut out = Vec::new();
    while n > 0 {
        let idx = (n % base) as usize;
        out.push(ALPHABET[idx] as char);
        n /= base;
    }
    out.iter().rev().collect()
}

fn encode_base62_width(num: u64, width: usize) -> String {
    let base = encode_base62(num);
    if base.len() >= width {
        base
    } else {
        format!("{}{}", "0".repeat(width - base.len()), base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileStore;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_initialize_creates_and_persists_key() {
        let tmp = tempdir().unwrap();
        let mut kv = FileStore::open(tmp.path()).unwrap();
        let keys = KeyStore::initialize(&mut kv).unwrap();
        assert!(keys.active().id().is_some());
        assert!(keys.legacy().is_none());
        assert!(kv.get(ACTIVE_KEY_SLOT).unwrap().is_some());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let tmp = tempdir().unwrap();
        let mut kv = FileStore::open(tmp.path()).unwrap();
        let first = KeyStore::initialize(&mut kv).unwrap();
        let second = KeyStore::initialize(&mut kv).unwrap();
        assert_eq!(first.active().bytes(), second.active().bytes());
        assert_eq!(first.active_id(), second.active_id());
    }

    #[test]
    fn test_rotate_demotes_previous_key() {
        let tmp = tempdir().unwrap();
        let mut kv = FileStore::open(tmp.path()).unwrap();
        let mut keys = KeyStore::initialize(&mut kv).unwrap();
        let old_bytes = *keys.active().bytes();
        let old_id = keys.active_id().to_string();

        keys.rotate(&mut kv).unwrap();
        assert_ne!(keys.active().bytes(), &old_bytes);
        assert_ne!(keys.active_id(), old_id);
        let legacy = keys.legacy().expect("retired key kept as legacy");
        assert_eq!(legacy.bytes(), &old_bytes);
        assert!(legacy.id().is_none());

        // The rotated-in key is what a fresh initialize sees as active.
        let reloaded = KeyStore::initialize(&mut kv).unwrap();
        assert_eq!(reloaded.active().bytes(), keys.active().bytes());
    }

    #[test]
    fn test_legacy_slot_is_imported() {
        let tmp = tempdir().unwrap();
        let mut kv = FileStore::open(tmp.path()).unwrap();
        let raw = [7u8; KEY_LEN];
        let encoded = general_purpose::STANDARD.encode(raw);
        kv.set(LEGACY_KEY_SLOT, &json!({ "key": encoded })).unwrap();

        let keys = KeyStore::initialize(&mut kv).unwrap();
        let legacy = keys.legacy().expect("legacy key imported");
        assert_eq!(legacy.bytes(), &raw);
        assert!(legacy.id().is_none());
    }

    #[test]
    fn test_legacy_slot_bare_string_form() {
        let tmp = tempdir().unwrap();
        let mut kv = FileStore::open(tmp.path()).unwrap();
        let raw = [9u8; KEY_LEN];
        let encoded = general_purpose::STANDARD.encode(raw);
        kv.set(LEGACY_KEY_SLOT, &json!(encoded)).unwrap();

        let keys = KeyStore::initialize(&mut kv).unwrap();
        assert_eq!(keys.legacy().unwrap().bytes(), &raw);
    }

    #[test]
    fn test_drop_legacy_removes_record() {
        let tmp = tempdir().unwrap();
        let mut kv = FileStore::open(tmp.path()).unwrap();
        let encoded = general_purpose::STANDARD.encode([7u8; KEY_LEN]);
        kv.set(LEGACY_KEY_SLOT, &json!({ "key": encoded })).unwrap();

        let mut keys = KeyStore::initialize(&mut kv).unwrap();
        keys.drop_legacy(&mut kv).unwrap();
        assert!(keys.legacy().is_none());
        assert!(kv.get(LEGACY_KEY_SLOT).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_key_record_is_fatal() {
        let tmp = tempdir().unwrap();
        let mut kv = FileStore::open(tmp.path()).unwrap();
        kv.set(ACTIVE_KEY_SLOT, &json!({ "key": "not-base64!!" })).unwrap();
        let err = KeyStore::initialize(&mut kv).unwrap_err();
        assert!(matches!(err, StoreError::KeyUnavailable(_)));
    }

    #[test]
    fn test_fresh_key_ids_are_monotonic() {
        let a = fresh_key_id();
        let b = fresh_key_id();
        assert!(b > a, "{b} should sort after {a}");
    }
}
