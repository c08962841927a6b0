//! Error taxonomy for the Stash storage and policy engine.
//!
//! Every fallible core operation returns [`StashError`]. The HTTP shell
//! matches on this enum to pick a status code; nothing in this crate
//! knows about HTTP.

use thiserror::Error;

/// Errors surfaced by the storage engine, crypto module, authorization
/// model, config loader, audit pipeline, and git collaborator.
#[derive(Debug, Error)]
pub enum StashError {
    /// No entry for the key, or the requested session/revision is absent.
    #[error("not found")]
    NotFound,

    /// Optimistic-concurrency version mismatch on `SetWithVersion`.
    #[error("version conflict")]
    Conflict(Box<ConflictInfo>),

    /// A secret-path key was accessed but no master key is configured.
    #[error("secrets are not configured")]
    SecretsNotConfigured,

    /// A secret-path write carried a `$ZK$` envelope that is not
    /// structurally valid.
    #[error("invalid zero-knowledge payload")]
    InvalidZkPayload,

    /// Decryption failed: wrong key, corruption, or tampering. Never
    /// disclose the attempted plaintext or ciphertext in this variant.
    #[error("decryption failed")]
    DecryptionFailed,

    /// No credential was presented, or the credential does not match
    /// any configured user/token/public entry.
    #[error("unauthorized")]
    Unauthorized,

    /// A credential was presented but lacks permission for the request.
    #[error("permission denied")]
    Denied,

    /// The configuration file failed schema or semantic validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A request-scoped cancellation fired; never remapped to NotFound
    /// or Conflict.
    #[error("operation cancelled")]
    Cancelled,

    /// Transient backend failure (I/O, network, serialization error) or
    /// a programmer error. Maps to an internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Snapshot of the current stored record returned alongside a
/// [`StashError::Conflict`], letting the caller retry with the right
/// version token.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    /// The value currently stored (plaintext, even for secret keys).
    pub current_value: Vec<u8>,
    /// The format currently stored.
    pub current_format: String,
    /// The `updated_at` token the caller must present to retry.
    pub current_version: chrono::DateTime<chrono::Utc>,
}

impl StashError {
    /// Build a `Conflict` error from its parts.
    pub fn conflict(
        current_value: Vec<u8>,
        current_format: String,
        current_version: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self::Conflict(Box::new(ConflictInfo {
            current_value,
            current_format,
            current_version,
        }))
    }
}

pub type StashResult<T> = Result<T, StashError>;

impl From<rusqlite::Error> for StashError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(format!("sqlite: {err}"))
    }
}

impl From<tokio_postgres::Error> for StashError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Internal(format!("postgres: {err}"))
    }
}
