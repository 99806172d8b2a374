//! Makes a key rotation transparent to previously-encrypted notes: anything
//! the active key cannot open is recovered with the legacy key and sealed
//! again under the active one.

use crate::cipher;
use crate::error::{StoreError, StoreResult};
use crate::keystore::KeyStore;
use crate::note::Note;

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Notes recovered with the legacy key and re-encrypted.
    pub migrated: usize,
    /// Notes whose envelope only needed its key id backfilled after the
    /// active key was verified to open them.
    pub restamped: usize,
    /// Notes neither key could open. Left untouched so nothing is lost;
    /// surfaced so the caller can offer a reset path.
    pub unrecoverable: Vec<i64>,
    /// True when any envelope changed and one batched persist is due.
    pub dirty: bool,
}

/// Reconcile every note with the current key set, in place. Idempotent:
/// with no legacy key and no versionless envelopes this touches nothing,
/// and a second pass after a migration finds all notes already openable
/// under the active key.
pub fn reconcile_keys(
    keys: &KeyStore,
    notes: &mut [Note],
) -> StoreResult<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();
    let active = keys.active();

    for note in notes.iter_mut() {
        // Envelopes without a key id predate versioning; those are exactly
        // the ones worth probing when no rotation is in flight.
        if keys.legacy().is_none() && note.text.key_id.is_some() {
            continue;
        }

        match cipher::decrypt(active, &note.text) {
            Ok(_) => {
                if note.text.key_id.as_deref() != Some(keys.active_id()) {
                    note.text.key_id = Some(keys.active_id().to_string());
                    outcome.restamped += 1;
                    outcome.dirty = true;
                }
            }
            Err(StoreError::AuthenticationFailed) => {
                let Some(legacy) = keys.legacy() else {
                    outcome.unrecoverable.push(note.id);
                    continue;
                };
                match cipher::decrypt(legacy, &note.text) {
                    Ok(plaintext) => {
                        note.text = cipher::encrypt(active, &plaintext)?;
                        outcome.migrated += 1;
                        outcome.dirty = true;
                    }
                    Err(StoreError::AuthenticationFailed) => {
                        outcome.unrecoverable.push(note.id);
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
    }

    if outcome.migrated > 0 || !outcome.unrecoverable.is_empty() {
        tracing::info!(
            migrated = outcome.migrated,
            restamped = outcome.restamped,
            unrecoverable = outcome.unrecoverable.len(),
            "key reconciliation finished"
        );
    }
    Ok(outcome)
}
