//! Stateless AES-256-GCM encryption bound to one key.
//! Every call draws a fresh random nonce; decryption verifies the integrity
//! tag before any plaintext is returned.

use crate::error::{StoreError, StoreResult};
use crate::keystore::Key;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};

pub const NONCE_LEN: usize = 12;

/// Ciphertext plus the nonce it was sealed with and the id of the key that
/// produced it. `keyId` is absent only on pre-versioning data. Envelopes are
/// never edited; re-encryption produces a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    #[serde(rename = "keyId", default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Seal `plaintext` under `key` with a fresh 12-byte nonce.
pub fn encrypt(key: &Key, plaintext: &str) -> StoreResult<EncryptedEnvelope> {
    let cipher = Aes256Gcm::new_from_slice(key.bytes())
        .map_err(|e| StoreError::KeyUnavailable(e.to_string()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|e| StoreError::KeyUnavailable(format!("encryption failed: {e}")))?;
    Ok(EncryptedEnvelope {
        ciphertext,
        nonce: nonce_bytes.to_vec(),
        key_id: key.id().map(|s| s.to_string()),
    })
}

/// Open `envelope` under `key`. Tag mismatch, wrong key, and bad nonce
/// length all come back as `AuthenticationFailed`, never as garbage
/// plaintext. Callers use this signal to try the next key.
pub fn decrypt(key: &Key, envelope: &EncryptedEnvelope) -> StoreResult<String> {
    if envelope.nonce.len() != NONCE_LEN {
        return Err(StoreError::AuthenticationFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key.bytes())
        .map_err(|e| StoreError::KeyUnavailable(e.to_string()))?;
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            envelope.ciphertext.as_ref(),
        )
        .map_err(|_| StoreError::AuthenticationFailed)?;
    String::from_utf8(plaintext).map_err(|_| StoreError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8, id: &str) -> Key {
        Key::from_bytes([fill; 32], Some(id))
    }

    #[test]
    fn test_roundtrip() {
        let k = key(1, "k1");
        let envelope = encrypt(&k, "select * from notes").unwrap();
        assert_eq!(envelope.nonce.len(), NONCE_LEN);
        assert_eq!(envelope.key_id.as_deref(), Some("k1"));
        assert_eq!(decrypt(&k, &envelope).unwrap(), "select * from notes");
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let k = key(1, "k1");
        let envelope = encrypt(&k, "").unwrap();
        assert_eq!(decrypt(&k, &envelope).unwrap(), "");
    }

    #[test]
    fn test_nonces_are_unique_per_call() {
        let k = key(1, "k1");
        let a = encrypt(&k, "same text").unwrap();
        let b = encrypt(&k, "same text").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails_cleanly() {
        let envelope = encrypt(&key(1, "k1"), "secret").unwrap();
        let err = decrypt(&key(2, "k2"), &envelope).unwrap_err();
        assert!(matches!(err, StoreError::AuthenticationFailed));
    }

    #[test]
    fn test_tampered_ciphertext_detected() {
        let k = key(1, "k1");
        let clean = encrypt(&k, "tamper target").unwrap();
        for i in 0..clean.ciphertext.len() {
            let mut bent = clean.clone();
            bent.ciphertext[i] ^= 0x01;
            assert!(
                matches!(
                    decrypt(&k, &bent),
                    Err(StoreError::AuthenticationFailed)
                ),
                "flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_tampered_nonce_detected() {
        let k = key(1, "k1");
        let clean = encrypt(&k, "tamper target").unwrap();
        for i in 0..NONCE_LEN {
            let mut bent = clean.clone();
            bent.nonce[i] ^= 0x01;
            assert!(matches!(
                decrypt(&k, &bent),
                Err(StoreError::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn test_bad_nonce_length_rejected_up_front() {
        let k = key(1, "k1");
        let mut envelope = encrypt(&k, "short nonce").unwrap();
        envelope.nonce.truncate(8);
        assert!(matches!(
            decrypt(&k, &envelope),
            Err(StoreError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_envelope_serializes_with_camel_case_key_id() {
        let k = key(1, "k1");
        let envelope = encrypt(&k, "wire format").unwrap();
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"keyId\":\"k1\""));
        assert!(json.contains("\"ciphertext\":["));

        let back: EncryptedEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }
}
