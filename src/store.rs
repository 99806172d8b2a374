//! The note store facade: key store, cipher, codec, and migration composed
//! over the key-value collaborator. Every mutation computes the full new
//! collection in memory and issues a single write.

use crate::cipher;
use crate::codec;
use crate::error::{QuotaExceeded, StoreError, StoreResult};
use crate::keystore::KeyStore;
use crate::migrate::{self, ReconcileOutcome};
use crate::note::{self, Category, Note};
use crate::storage::KvStore;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub(crate) const NOTES_SLOT: &str = "notes";

/// Rough serialized footprint of an envelope beyond its plaintext length:
/// nonce, GCM tag, and the JSON number-array framing (ciphertext bytes are
/// written as decimal array elements, up to four characters each).
const ENVELOPE_OVERHEAD_BYTES: u64 = 256;

#[derive(Debug, Clone)]
pub struct Limits {
    pub max_note_bytes: usize,
    pub max_notes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_note_bytes: 4 * 1024 * 1024, max_notes: 10_000 }
    }
}

impl Limits {
    pub fn from_env() -> Self {
        let defaults = Limits::default();
        let env_usize = |name: &str, fallback: usize| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        };
        Self {
            max_note_bytes: env_usize(
                "SNIP_NOTES_MAX_NOTE_BYTES",
                defaults.max_note_bytes,
            ),
            max_notes: env_usize("SNIP_NOTES_MAX_NOTES", defaults.max_notes),
        }
    }
}

pub struct LoadOutcome {
    /// Canonical notes, newest first.
    pub notes: Vec<Note>,
    /// Unsalvageable records dropped during normalization.
    pub dropped: usize,
    /// Notes re-encrypted from the legacy key on this load.
    pub migrated: usize,
    /// Ids whose envelope no available key can open.
    pub unrecoverable: Vec<i64>,
}

pub struct ImportOutcome {
    pub imported: usize,
    pub skipped: usize,
    pub dropped: usize,
}

pub struct NoteStore<S: KvStore> {
    kv: S,
    keys: KeyStore,
    limits: Limits,
}

impl<S: KvStore> NoteStore<S> {
    /// Open the store: load or create the key set, and when a legacy key is
    /// waiting, run the migration pass immediately so the rotation is
    /// invisible to every later operation.
    pub fn open(kv: S) -> StoreResult<Self> {
        Self::open_with_limits(kv, Limits::from_env())
    }

    pub fn open_with_limits(mut kv: S, limits: Limits) -> StoreResult<Self> {
        let keys = KeyStore::initialize(&mut kv)?;
        let mut store = Self { kv, keys, limits };
        if store.keys.legacy().is_some() {
            let outcome = store.load_all()?;
            tracing::info!(
                migrated = outcome.migrated,
                unrecoverable = outcome.unrecoverable.len(),
                "legacy key migration complete"
            );
            store.keys.drop_legacy(&mut store.kv)?;
        }
        Ok(store)
    }

    /// Encrypt and prepend a new note. All three quota checks run before
    /// any cryptographic work so rejected saves cost nothing.
    pub fn save(
        &mut self,
        text: &str,
        category: Category,
        source: Option<String>,
    ) -> StoreResult<Note> {
        let size = text.len();
        if size > self.limits.max_note_bytes {
            return Err(QuotaExceeded::NoteTooLarge {
                size,
                limit: self.limits.max_note_bytes,
            }
            .into());
        }
        let mut notes = self.read_collection()?;
        if notes.len() >= self.limits.max_notes {
            return Err(QuotaExceeded::TooManyNotes {
                count: notes.len(),
                limit: self.limits.max_notes,
            }
            .into());
        }
        let projected = self.kv.bytes_in_use()?
            + size as u64 * 4
            + ENVELOPE_OVERHEAD_BYTES;
        if projected > self.kv.capacity() {
            return Err(QuotaExceeded::StorageFull {
                projected,
                capacity: self.kv.capacity(),
            }
            .into());
        }

        let envelope = cipher::encrypt(self.keys.active(), text)?;
        let note = Note {
            id: note::next_note_id(&notes),
            text: envelope,
            category,
            timestamp: note::timestamp_string(),
            source,
        };
        notes.insert(0, note.clone());
        self.persist(&notes)?;
        Ok(note)
    }

    /// Load the whole collection, normalizing schema drift and reconciling
    /// key versions. A single batched write follows when anything changed;
    /// per-note failures degrade that note, never the load.
    pub fn load_all(&mut self) -> StoreResult<LoadOutcome> {
        let raw = self.kv.get(NOTES_SLOT)?;
        let decoded =
            codec::decode_collection(raw.as_ref(), self.keys.active())?;
        let mut notes = decoded.notes;
        let outcome = migrate::reconcile_keys(&self.keys, &mut notes)?;
        note::sort_newest_first(&mut notes);
        if decoded.dirty || outcome.dirty {
            self.persist(&notes)?;
        }
        if decoded.dropped > 0 {
            tracing::warn!(
                dropped = decoded.dropped,
                "collection contained unsalvageable records"
            );
        }
        Ok(LoadOutcome {
            notes,
            dropped: decoded.dropped,
            migrated: outcome.migrated,
            unrecoverable: outcome.unrecoverable,
        })
    }

    /// Edit a note in place. New text is re-encrypted under the active key,
    /// refreshing the envelope's key id and the note's timestamp.
    pub fn update(
        &mut self,
        id: i64,
        text: Option<&str>,
        category: Option<Category>,
    ) -> StoreResult<Note> {
        if let Some(text) = text {
            if text.len() > self.limits.max_note_bytes {
                return Err(QuotaExceeded::NoteTooLarge {
                    size: text.len(),
                    limit: self.limits.max_note_bytes,
                }
                .into());
            }
        }
        let mut notes = self.read_collection()?;
        let note = notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(StoreError::NotFound { id })?;
        if let Some(text) = text {
            note.text = cipher::encrypt(self.keys.active(), text)?;
            note.timestamp = note::timestamp_string();
        }
        if let Some(category) = category {
            note.category = category;
        }
        let updated = note.clone();
        self.persist(&notes)?;
        Ok(updated)
    }

    pub fn delete(&mut self, id: i64) -> StoreResult<()> {
        let mut notes = self.read_collection()?;
        let before = notes.len();
        notes.retain(|n| n.id != id);
        if notes.len() == before {
            return Err(StoreError::NotFound { id });
        }
        self.persist(&notes)
    }

    pub fn delete_all(&mut self) -> StoreResult<usize> {
        let count = self.read_collection()?.len();
        self.persist(&[])?;
        Ok(count)
    }

    /// Decrypt one note for display, falling back to the legacy key while a
    /// migration pass is still in flight.
    pub fn decrypt_note(&self, note: &Note) -> StoreResult<String> {
        match cipher::decrypt(self.keys.active(), &note.text) {
            Err(StoreError::AuthenticationFailed) => match self.keys.legacy() {
                Some(legacy) => cipher::decrypt(legacy, &note.text),
                None => Err(StoreError::AuthenticationFailed),
            },
            other => other,
        }
    }

    /// Rotate to a fresh key and immediately re-encrypt the collection so
    /// the retired key can be forgotten before this call returns.
    pub fn rotate_key(&mut self) -> StoreResult<ReconcileOutcome> {
        self.keys.rotate(&mut self.kv)?;
        let raw = self.kv.get(NOTES_SLOT)?;
        let decoded =
            codec::decode_collection(raw.as_ref(), self.keys.active())?;
        let mut notes = decoded.notes;
        let outcome = migrate::reconcile_keys(&self.keys, &mut notes)?;
        if decoded.dirty || outcome.dirty {
            self.persist(&notes)?;
        }
        self.keys.drop_legacy(&mut self.kv)?;
        Ok(outcome)
    }

    /// Write the canonical encrypted collection to a backup file.
    pub fn export(&mut self, path: &Path) -> StoreResult<usize> {
        let outcome = self.load_all()?;
        let json = serde_json::to_string_pretty(&outcome.notes)
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        fs::write(path, json)?;
        Ok(outcome.notes.len())
    }

    /// Merge a backup file into the collection, skipping ids that already
    /// exist. Incoming records go through the same shape normalization as a
    /// load, so old backups import cleanly.
    pub fn import(&mut self, path: &Path) -> StoreResult<ImportOutcome> {
        let raw = fs::read_to_string(path)?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| {
                StoreError::MalformedRecord(format!("import file: {e}"))
            })?;
        let incoming =
            codec::decode_collection(Some(&value), self.keys.active())?;

        let mut notes = self.read_collection()?;
        let existing: HashSet<i64> = notes.iter().map(|n| n.id).collect();
        let mut imported = 0;
        let mut skipped = 0;
        for note in incoming.notes {
            if existing.contains(&note.id) {
                skipped += 1;
            } else {
                notes.push(note);
                imported += 1;
            }
        }
        if notes.len() > self.limits.max_notes {
            return Err(QuotaExceeded::TooManyNotes {
                count: notes.len(),
                limit: self.limits.max_notes,
            }
            .into());
        }
        note::sort_newest_first(&mut notes);
        self.persist(&notes)?;
        Ok(ImportOutcome {
            imported,
            skipped,
            dropped: incoming.dropped,
        })
    }

    pub fn active_key_id(&self) -> &str {
        self.keys.active_id()
    }

    pub fn bytes_in_use(&self) -> StoreResult<u64> {
        self.kv.bytes_in_use()
    }

    pub fn capacity(&self) -> u64 {
        self.kv.capacity()
    }

    fn read_collection(&mut self) -> StoreResult<Vec<Note>> {
        let raw = self.kv.get(NOTES_SLOT)?;
        let decoded =
            codec::decode_collection(raw.as_ref(), self.keys.active())?;
        Ok(decoded.notes)
    }

    fn persist(&mut self, notes: &[Note]) -> StoreResult<()> {
        let value = serde_json::to_value(notes)
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        self.kv.set(NOTES_SLOT, &value)
    }
}
