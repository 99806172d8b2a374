//! Normalizes the historically-inconsistent persisted note shapes into the
//! canonical schema. Purely in-memory: callers decide whether and when the
//! migrated collection is persisted.

use crate::cipher::{self, EncryptedEnvelope, NONCE_LEN};
use crate::error::{StoreError, StoreResult};
use crate::keystore::Key;
use crate::note::{Category, Note, timestamp_string};
use base64::{Engine as _, engine::general_purpose};
use serde_json::Value;

/// The known persisted shapes of a note's `text` field, newest first.
#[derive(Debug, PartialEq)]
pub(crate) enum RawText {
    /// Canonical envelope: `ciphertext` and `nonce` as byte arrays.
    Canonical(EncryptedEnvelope),
    /// Envelope content that needed coercion: base64 strings where byte
    /// arrays belong, or the pre-rename `encrypted`/`iv` field names.
    Coerced(EncryptedEnvelope),
    /// Pre-encryption data stored in the clear.
    Plaintext(String),
    Unsalvageable,
}

/// A record is well-formed iff it has a non-empty id, `text` is an object
/// (never a bare string), and the envelope carries byte-sequence ciphertext
/// plus a nonce of exactly 12 bytes.
pub fn validate(raw: &Value) -> bool {
    let Some(record) = raw.as_object() else {
        return false;
    };
    if !has_id(record.get("id")) {
        return false;
    }
    let Some(text) = record.get("text").and_then(Value::as_object) else {
        return false;
    };
    let ciphertext = text.get("ciphertext").and_then(byte_array);
    let nonce = text.get("nonce").and_then(byte_array);
    matches!((ciphertext, nonce), (Some(_), Some(n)) if n.len() == NONCE_LEN)
}

#[derive(Debug)]
pub struct DecodedCollection {
    pub notes: Vec<Note>,
    /// Records that could not be salvaged. Never silent: the caller surfaces
    /// this count.
    pub dropped: usize,
    /// True when any record changed shape and the collection should be
    /// rewritten in canonical form.
    pub dirty: bool,
}

/// Decode the raw `notes` slot value. Per-record failures drop that record
/// (counted), never the whole load.
pub fn decode_collection(
    raw: Option<&Value>,
    active: &Key,
) -> StoreResult<DecodedCollection> {
    let records = match raw {
        None => {
            return Ok(DecodedCollection {
                notes: Vec::new(),
                dropped: 0,
                dirty: false,
            });
        }
        Some(value) => value.as_array().ok_or_else(|| {
            StoreError::MalformedRecord(
                "notes slot does not hold a collection".to_string(),
            )
        })?,
    };

    let mut notes = Vec::with_capacity(records.len());
    let mut dropped = 0;
    let mut dirty = false;
    for record in records {
        match migrate_record(record, active)? {
            Some((note, changed)) => {
                dirty |= changed;
                notes.push(note);
            }
            None => {
                tracing::warn!(record = %record, "dropping unsalvageable note record");
                dropped += 1;
                dirty = true;
            }
        }
    }
    Ok(DecodedCollection { notes, dropped, dirty })
}

/// Total migration from any known shape to the canonical one, or `None`
/// when the record cannot be salvaged. `Ok(Some((note, changed)))` reports
/// whether the record differs from what was persisted.
pub(crate) fn migrate_record(
    raw: &Value,
    active: &Key,
) -> StoreResult<Option<(Note, bool)>> {
    let Some(record) = raw.as_object() else {
        return Ok(None);
    };

    let Some((id, id_coerced)) = note_id(record.get("id")) else {
        return Ok(None);
    };
    let mut changed = id_coerced;

    let (text, text_changed) = match classify_text(record.get("text")) {
        RawText::Canonical(envelope) => (envelope, false),
        RawText::Coerced(envelope) => (envelope, true),
        RawText::Plaintext(plain) => (cipher::encrypt(active, &plain)?, true),
        RawText::Unsalvageable => return Ok(None),
    };
    changed |= text_changed;

    let category = match record.get("category").and_then(Value::as_str) {
        Some(name) => Category::parse(name),
        None => {
            changed = true;
            Category::Other
        }
    };

    let timestamp = match record.get("timestamp").and_then(Value::as_str) {
        Some(ts) => ts.to_string(),
        None => {
            changed = true;
            timestamp_string()
        }
    };

    let source = record
        .get("source")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    Ok(Some((Note { id, text, category, timestamp, source }, changed)))
}

pub(crate) fn classify_text(value: Option<&Value>) -> RawText {
    match value {
        Some(Value::String(plain)) => RawText::Plaintext(plain.clone()),
        Some(Value::Object(text)) => {
            // Current and pre-rename field pairs, in priority order.
            for (ct_field, nonce_field) in
                [("ciphertext", "nonce"), ("encrypted", "iv")]
            {
                let Some(ct_value) = text.get(ct_field) else {
                    continue;
                };
                let ciphertext = byte_sequence(ct_value);
                let nonce =
                    text.get(nonce_field).and_then(|v| byte_sequence(v));
                let (Some((ciphertext, ct_coerced)), Some((nonce, n_coerced))) =
                    (ciphertext, nonce)
                else {
                    return RawText::Unsalvageable;
                };
                if nonce.len() != NONCE_LEN {
                    return RawText::Unsalvageable;
                }
                let key_id = text
                    .get("keyId")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string());
                let envelope = EncryptedEnvelope { ciphertext, nonce, key_id };
                return if ct_coerced || n_coerced || ct_field == "encrypted" {
                    RawText::Coerced(envelope)
                } else {
                    RawText::Canonical(envelope)
                };
            }
            // No ciphertext at all: the object is pre-encryption data that
            // a serialization bug wrapped. Salvage its content rather than
            // lose it.
            match text.get("text").and_then(Value::as_str) {
                Some(inner) => RawText::Plaintext(inner.to_string()),
                None => RawText::Plaintext(
                    serde_json::to_string(text).unwrap_or_default(),
                ),
            }
        }
        _ => RawText::Unsalvageable,
    }
}

fn has_id(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Number(n)) => n.as_i64().is_some(),
        Some(Value::String(s)) => !s.trim().is_empty(),
        _ => false,
    }
}

/// Note ids are integers; string ids from older exports are coerced.
fn note_id(value: Option<&Value>) -> Option<(i64, bool)> {
    match value {
        Some(Value::Number(n)) => n.as_i64().map(|id| (id, false)),
        Some(Value::String(s)) => s.trim().parse().ok().map(|id| (id, true)),
        _ => None,
    }
}

/// Byte sequence in canonical array form, or base64 text from a
/// serialization mismatch. The bool reports whether coercion happened.
fn byte_sequence(value: &Value) -> Option<(Vec<u8>, bool)> {
    match value {
        Value::Array(_) => byte_array(value).map(|bytes| (bytes, false)),
        Value::String(encoded) => general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()
            .map(|bytes| (bytes, true)),
        _ => None,
    }
}

fn byte_array(value: &Value) -> Option<Vec<u8>> {
    let items = value.as_array()?;
    let mut bytes = Vec::with_capacity(items.len());
    for item in items {
        let n = item.as_u64()?;
        if n > u8::MAX as u64 {
            return None;
        }
        bytes.push(n as u8);
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn active_key() -> Key {
        Key::from_bytes([3; 32], Some("k-active"))
    }

    fn envelope_json(envelope: &EncryptedEnvelope) -> Value {
        serde_json::to_value(envelope).unwrap()
    }

    #[test]
    fn test_validate_accepts_canonical_record() {
        let key = active_key();
        let envelope = cipher::encrypt(&key, "hello").unwrap();
        let record = json!({
            "id": 1,
            "text": envelope_json(&envelope),
            "category": "sql",
            "timestamp": "2024-01-01T00:00:00.000Z",
        });
        assert!(validate(&record));
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(!validate(&json!("not a record")));
        assert!(!validate(&json!({
            "text": {
                "ciphertext": [1],
                "nonce": [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            },
        })));
        assert!(!validate(&json!({ "id": 1, "text": "bare string" })));
        assert!(!validate(&json!({
            "id": 1,
            "text": { "ciphertext": [1, 2], "nonce": [0, 0, 0] },
        })));
    }

    #[test]
    fn test_plain_string_text_is_reencrypted() {
        let key = active_key();
        let raw = json!([{ "id": 1, "text": "hello" }]);
        let decoded = decode_collection(Some(&raw), &key).unwrap();
        assert_eq!(decoded.dropped, 0);
        assert!(decoded.dirty);
        let note = &decoded.notes[0];
        assert_eq!(note.id, 1);
        assert_eq!(note.text.key_id.as_deref(), Some("k-active"));
        assert_eq!(cipher::decrypt(&key, &note.text).unwrap(), "hello");
        // Absent timestamp was stamped.
        assert!(!note.timestamp.is_empty());
    }

    #[test]
    fn test_pre_rename_field_names_are_coerced() {
        let key = active_key();
        let envelope = cipher::encrypt(&key, "old wire shape").unwrap();
        let raw = json!([{
            "id": 5,
            "text": { "encrypted": envelope.ciphertext, "iv": envelope.nonce },
            "category": "snippet",
            "timestamp": "2023-06-01T10:00:00.000Z",
        }]);
        let decoded = decode_collection(Some(&raw), &key).unwrap();
        assert!(decoded.dirty);
        let note = &decoded.notes[0];
        assert!(note.text.key_id.is_none());
        assert_eq!(
            cipher::decrypt(&key, &note.text).unwrap(),
            "old wire shape"
        );
    }

    #[test]
    fn test_base64_byte_fields_are_coerced() {
        let key = active_key();
        let envelope = cipher::encrypt(&key, "mismatched encoding").unwrap();
        let raw = json!([{
            "id": 6,
            "text": {
                "ciphertext":
                    general_purpose::STANDARD.encode(&envelope.ciphertext),
                "nonce": general_purpose::STANDARD.encode(&envelope.nonce),
                "keyId": "k-active",
            },
            "category": "command",
            "timestamp": "2023-06-01T10:00:00.000Z",
        }]);
        let decoded = decode_collection(Some(&raw), &key).unwrap();
        assert!(decoded.dirty);
        let note = &decoded.notes[0];
        assert_eq!(note.text.key_id.as_deref(), Some("k-active"));
        assert_eq!(
            cipher::decrypt(&key, &note.text).unwrap(),
            "mismatched encoding"
        );
    }

    #[test]
    fn test_well_formed_envelope_without_key_id_is_untouched() {
        let key = active_key();
        let mut envelope = cipher::encrypt(&key, "versionless").unwrap();
        envelope.key_id = None;
        let raw = json!([{
            "id": 7,
            "text": envelope_json(&envelope),
            "category": "other",
            "timestamp": "2023-06-01T10:00:00.000Z",
        }]);
        let decoded = decode_collection(Some(&raw), &key).unwrap();
        // keyId backfill is the migration pass's job, not the codec's.
        assert!(!decoded.dirty);
        assert!(decoded.notes[0].text.key_id.is_none());
    }

    #[test]
    fn test_unsalvageable_records_are_dropped_and_counted() {
        let key = active_key();
        let good = cipher::encrypt(&key, "keeper").unwrap();
        let raw = json!([
            { "id": 1, "text": envelope_json(&good), "category": "sql",
              "timestamp": "2024-01-01T00:00:00.000Z" },
            { "id": 2, "text": 42 },
            { "text": "no id at all" },
            { "id": 4, "text": { "ciphertext": [1, 2, 3], "nonce": [0, 0] } },
        ]);
        let decoded = decode_collection(Some(&raw), &key).unwrap();
        assert_eq!(decoded.notes.len(), 1);
        assert_eq!(decoded.dropped, 3);
        assert!(decoded.dirty);
    }

    #[test]
    fn test_string_id_is_coerced() {
        let key = active_key();
        let raw = json!([{ "id": "1700000000000", "text": "hi" }]);
        let decoded = decode_collection(Some(&raw), &key).unwrap();
        assert_eq!(decoded.notes[0].id, 1_700_000_000_000);
        assert!(decoded.dirty);
    }

    #[test]
    fn test_object_without_ciphertext_is_salvaged_as_plaintext() {
        let key = active_key();
        let raw = json!([{
            "id": 9,
            "text": { "text": "stuck in a wrapper" },
            "timestamp": "2023-06-01T10:00:00.000Z",
        }]);
        let decoded = decode_collection(Some(&raw), &key).unwrap();
        assert_eq!(
            cipher::decrypt(&key, &decoded.notes[0].text).unwrap(),
            "stuck in a wrapper"
        );
    }

    #[test]
    fn test_missing_slot_decodes_to_empty() {
        let decoded = decode_collection(None, &active_key()).unwrap();
        assert!(decoded.notes.is_empty());
        assert!(!decoded.dirty);
    }

    #[test]
    fn test_non_array_slot_is_a_store_wide_failure() {
        let err = decode_collection(Some(&json!("oops")), &active_key())
            .unwrap_err();
        assert!(matches!(err, StoreError::MalformedRecord(_)));
    }

    #[test]
    fn test_canonical_records_do_not_mark_dirty() {
        let key = active_key();
        let envelope = cipher::encrypt(&key, "stable").unwrap();
        let raw = json!([{
            "id": 1,
            "text": envelope_json(&envelope),
            "category": "sql",
            "timestamp": "2024-01-01T00:00:00.000Z",
        }]);
        let decoded = decode_collection(Some(&raw), &key).unwrap();
        assert!(!decoded.dirty);
    }
}
