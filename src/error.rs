//! Error types for the encrypted note store.
//! Per-note problems stay recoverable; only key loss is fatal to the store.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No usable encryption key. Fatal: without a key there is no data.
    #[error("no usable encryption key: {0}")]
    KeyUnavailable(String),

    /// One decrypt attempt failed its integrity check (wrong key, tampered
    /// ciphertext, or malformed nonce). Drives legacy-key fallback.
    #[error("decryption failed: wrong key or corrupted data")]
    AuthenticationFailed,

    /// A limit was hit before any encryption or write work happened.
    #[error(transparent)]
    Quota(#[from] QuotaExceeded),

    /// A persisted note record could not be normalized to the current schema.
    #[error("malformed note record: {0}")]
    MalformedRecord(String),

    #[error("note {id} not found")]
    NotFound { id: i64 },

    /// Key-value collaborator I/O failure. Writes are not retried, so a
    /// half-acknowledged write cannot be applied twice.
    #[error("storage unavailable: {0}")]
    Persistence(String),
}

/// Which limit a rejected save would have violated. Kept distinct so the
/// caller can render a precise message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotaExceeded {
    #[error("note too large: {size} bytes (limit {limit})")]
    NoteTooLarge { size: usize, limit: usize },

    #[error("note limit reached: {count} notes (limit {limit})")]
    TooManyNotes { count: usize, limit: usize },

    #[error("storage full: {projected} bytes needed, capacity {capacity}")]
    StorageFull { projected: u64, capacity: u64 },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_messages_are_distinct() {
        let too_large = QuotaExceeded::NoteTooLarge { size: 10, limit: 4 };
        let too_many = QuotaExceeded::TooManyNotes { count: 5, limit: 4 };
        let full = QuotaExceeded::StorageFull { projected: 20, capacity: 8 };
        assert!(too_large.to_string().contains("too large"));
        assert!(too_many.to_string().contains("note limit"));
        assert!(full.to_string().contains("storage full"));
    }

    #[test]
    fn test_io_error_maps_to_persistence() {
        let io = std::io::Error::other("disk gone");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Persistence(_)));
        assert!(err.to_string().contains("disk gone"));
    }
}
