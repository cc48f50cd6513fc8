//! Error types for AgenticKeyFamily.
//!
//! All errors are strongly typed and returned to the immediate caller.
//! Nothing is logged-and-swallowed inside the library. Messages carry
//! public identifiers only, never key material.

/// Key family error types covering registry parsing, replay, and queries.
#[derive(Debug, thiserror::Error)]
pub enum KeyFamilyError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Key {0} has been revoked")]
    Revoked(String),

    #[error("Key {kid} is outside its validity window [{ctime}, {etime}]")]
    Expired { kid: String, ctime: i64, etime: i64 },

    #[error("Wrong role for key {kid}: {reason}")]
    WrongRole { kid: String, reason: String },

    #[error("Invalid revocation: {0}")]
    InvalidRevocation(String),

    #[error("Device {0} does not exist")]
    NoDevice(String),

    #[error("No device provisioned for this context")]
    NotProvisioned,

    #[error("Eldest key mismatch: {0}")]
    EldestMismatch(String),

    #[error("Eldest key conflict: {existing} is already eldest, refusing {requested}")]
    EldestConflict { existing: String, requested: String },

    #[error("Chain link out of order: seqno {got} after {last}")]
    OutOfOrder { last: u64, got: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl KeyFamilyError {
    pub(crate) fn wrong_role(kid: impl ToString, reason: impl Into<String>) -> Self {
        Self::WrongRole {
            kid: kid.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, KeyFamilyError>;
