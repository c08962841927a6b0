//! Storage engine: one contract, two backends (local SQLite, networked
//! Postgres), auto-selected from the configured database URL.

pub mod dialect;
pub mod lock;
pub mod postgres;
pub mod sqlite;

use crate::error::StashResult;
use crate::format::Format;
use crate::types::{AuditEntry, AuditFilter, AuditQueryResult, ListFilter, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dialect::Dialect;
use std::sync::Arc;
use std::time::Duration;

/// A stored row's raw (possibly encrypted) bytes and bookkeeping, as the
/// storage engine sees them. Secret-path decryption is applied by
/// [`crate::engine::Engine`], one layer above this trait.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub format: Format,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of `SetWithVersion`.
pub enum SetVersionOutcome {
    Applied,
    Conflict(RawEntry),
}

/// The operations the storage engine exposes, identical across backends.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn get_raw(&self, key: &str) -> StashResult<RawEntry>;
    async fn set_raw(&self, key: &str, value: Vec<u8>, format: Format) -> StashResult<bool>;
    async fn set_raw_with_version(
        &self,
        key: &str,
        value: Vec<u8>,
        format: Format,
        expected_updated_at: DateTime<Utc>,
    ) -> StashResult<SetVersionOutcome>;
    async fn delete(&self, key: &str) -> StashResult<()>;
    async fn list_raw(&self, filter: ListFilter) -> StashResult<Vec<RawEntry>>;

    async fn create_session(&self, username: &str, ttl: Duration) -> StashResult<Session>;
    async fn get_session(&self, token: &str) -> StashResult<Option<Session>>;
    async fn delete_session(&self, token: &str) -> StashResult<()>;
    async fn delete_all_sessions(&self) -> StashResult<()>;
    async fn delete_sessions_by_username(&self, username: &str) -> StashResult<()>;
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StashResult<u64>;

    async fn log_audit(&self, entry: AuditEntry) -> StashResult<()>;
    async fn query_audit(&self, filter: AuditFilter) -> StashResult<AuditQueryResult>;
    async fn delete_audit_older_than(&self, cutoff: DateTime<Utc>) -> StashResult<u64>;
}

/// Apply a [`ListFilter`] to rows already ordered by `updated_at`, using
/// the same secret-path predicate the authorization and crypto layers use.
pub fn filter_entries(entries: Vec<RawEntry>, filter: ListFilter) -> Vec<RawEntry> {
    entries
        .into_iter()
        .filter(|e| filter.accepts(crate::key::is_secret(&e.key)))
        .collect()
}

/// Detect which backend a configured database URL points at.
/// `postgres://`/`postgresql://` select the networked backend; anything
/// else, including the special value `:memory:`, selects the local one.
pub fn detect_dialect(url: &str) -> Dialect {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Dialect::Postgres
    } else {
        Dialect::Sqlite
    }
}

/// Open the backend indicated by `url` and return it behind the trait
/// object boundary `stash-server` is written against.
pub async fn connect(url: &str) -> StashResult<Arc<dyn StorageEngine>> {
    match detect_dialect(url) {
        Dialect::Sqlite => Ok(Arc::new(sqlite::SqliteBackend::open(url)?)),
        Dialect::Postgres => Ok(Arc::new(postgres::PostgresBackend::connect(url).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_postgres_schemes() {
        assert_eq!(detect_dialect("postgres://u:p@host/db"), Dialect::Postgres);
        assert_eq!(
            detect_dialect("postgresql://u:p@host/db"),
            Dialect::Postgres
        );
    }

    #[test]
    fn everything_else_is_local() {
        assert_eq!(detect_dialect(":memory:"), Dialect::Sqlite);
        assert_eq!(detect_dialect("/var/lib/stash/stash.db"), Dialect::Sqlite);
        assert_eq!(detect_dialect("stash.db"), Dialect::Sqlite);
    }
}
