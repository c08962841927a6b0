//! Local, single-writer embedded backend (SQLite via `rusqlite`).

use super::lock::EngineLock;
use super::{RawEntry, SetVersionOutcome, StorageEngine, filter_entries};
use crate::error::{StashError, StashResult};
use crate::format::Format;
use crate::types::{
    ActorType, AuditAction, AuditEntry, AuditFilter, AuditQueryResult, AuditResult, ListFilter,
    Session, AUDIT_QUERY_MAX_LIMIT,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    lock: EngineLock,
}

impl SqliteBackend {
    pub fn open(url: &str) -> StashResult<Self> {
        let conn = Connection::open(url)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lock: EngineLock::local(),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection mutex poisoned")
    }
}

fn run_migrations(conn: &Connection) -> StashResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            format TEXT NOT NULL DEFAULT 'text',
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            expires_at DATETIME NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        CREATE INDEX IF NOT EXISTS idx_sessions_username ON sessions(username);
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            action TEXT NOT NULL,
            key TEXT NOT NULL,
            actor TEXT NOT NULL,
            actor_type TEXT NOT NULL,
            result TEXT NOT NULL,
            ip TEXT,
            user_agent TEXT,
            value_size INTEGER,
            request_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_audit_key ON audit_log(key);
        CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_log(actor);
        CREATE INDEX IF NOT EXISTS idx_audit_timestamp_key ON audit_log(timestamp, key);
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at DATETIME NOT NULL
        );",
    )?;

    let has_format_column: bool = {
        let mut stmt = conn.prepare("SELECT 1 FROM pragma_table_info('kv') WHERE name = 'format'")?;
        stmt.exists([])?
    };
    if !has_format_column {
        conn.execute(
            "ALTER TABLE kv ADD COLUMN format TEXT NOT NULL DEFAULT 'text'",
            [],
        )?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (1, ?)",
        params![Utc::now()],
    )?;
    Ok(())
}

fn row_to_entry(key: String, row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    let value: Vec<u8> = row.get(0)?;
    let format_raw: String = row.get(1)?;
    let created_at: DateTime<Utc> = row.get(2)?;
    let updated_at: DateTime<Utc> = row.get(3)?;
    Ok(RawEntry {
        key,
        value,
        format: Format::parse_or_default(&format_raw),
        created_at,
        updated_at,
    })
}

#[async_trait]
impl StorageEngine for SqliteBackend {
    async fn get_raw(&self, key: &str) -> StashResult<RawEntry> {
        let _g = self.lock.read().await;
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT value, format, created_at, updated_at FROM kv WHERE key = ?")?;
        stmt.query_row(params![key], |row| row_to_entry(key.to_string(), row))
            .optional()?
            .ok_or(StashError::NotFound)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, format: Format) -> StashResult<bool> {
        let _g = self.lock.write().await;
        let conn = self.conn();
        let now = Utc::now();
        // A single upsert: on conflict, created_at survives untouched while
        // updated_at is refreshed, so `created_at = updated_at` in the
        // returned row tells us whether this call inserted or updated.
        let created: bool = conn.query_row(
            "INSERT INTO kv (key, value, format, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, format = excluded.format, updated_at = excluded.updated_at
             RETURNING (created_at = updated_at)",
            params![key, value, format.as_str(), now, now],
            |row| row.get(0),
        )?;
        Ok(created)
    }

    async fn set_raw_with_version(
        &self,
        key: &str,
        value: Vec<u8>,
        format: Format,
        expected_updated_at: DateTime<Utc>,
    ) -> StashResult<SetVersionOutcome> {
        let _g = self.lock.write().await;
        let conn = self.conn();
        let now = Utc::now();
        let affected = conn.execute(
            "UPDATE kv SET value = ?, format = ?, updated_at = ? WHERE key = ? AND updated_at = ?",
            params![value, format.as_str(), now, key, expected_updated_at],
        )?;
        if affected == 1 {
            return Ok(SetVersionOutcome::Applied);
        }

        let mut stmt =
            conn.prepare("SELECT value, format, created_at, updated_at FROM kv WHERE key = ?")?;
        let current = stmt
            .query_row(params![key], |row| row_to_entry(key.to_string(), row))
            .optional()?;
        match current {
            Some(entry) => Ok(SetVersionOutcome::Conflict(entry)),
            None => Err(StashError::NotFound),
        }
    }

    async fn delete(&self, key: &str) -> StashResult<()> {
        let _g = self.lock.write().await;
        let conn = self.conn();
        let affected = conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        if affected == 0 {
            return Err(StashError::NotFound);
        }
        Ok(())
    }

    async fn list_raw(&self, filter: ListFilter) -> StashResult<Vec<RawEntry>> {
        let _g = self.lock.read().await;
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, value, format, created_at, updated_at FROM kv ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let key: String = row.get(0)?;
                let value: Vec<u8> = row.get(1)?;
                let format_raw: String = row.get(2)?;
                let created_at: DateTime<Utc> = row.get(3)?;
                let updated_at: DateTime<Utc> = row.get(4)?;
                Ok(RawEntry {
                    key,
                    value,
                    format: Format::parse_or_default(&format_raw),
                    created_at,
                    updated_at,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(filter_entries(rows, filter))
    }

    async fn create_session(&self, username: &str, ttl: Duration) -> StashResult<Session> {
        let _g = self.lock.write().await;
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (token, username, expires_at) VALUES (?, ?, ?)",
            params![token, username, expires_at],
        )?;
        Ok(Session {
            token,
            username: username.to_string(),
            expires_at,
        })
    }

    async fn get_session(&self, token: &str) -> StashResult<Option<Session>> {
        let _g = self.lock.read().await;
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT username, expires_at FROM sessions WHERE token = ?")?;
        let row = stmt
            .query_row(params![token], |row| {
                let username: String = row.get(0)?;
                let expires_at: DateTime<Utc> = row.get(1)?;
                Ok(Session {
                    token: token.to_string(),
                    username,
                    expires_at,
                })
            })
            .optional()?;
        Ok(row.filter(|s| s.expires_at > Utc::now()))
    }

    async fn delete_session(&self, token: &str) -> StashResult<()> {
        let _g = self.lock.write().await;
        self.conn()
            .execute("DELETE FROM sessions WHERE token = ?", params![token])?;
        Ok(())
    }

    async fn delete_all_sessions(&self) -> StashResult<()> {
        let _g = self.lock.write().await;
        self.conn().execute("DELETE FROM sessions", [])?;
        Ok(())
    }

    async fn delete_sessions_by_username(&self, username: &str) -> StashResult<()> {
        let _g = self.lock.write().await;
        self.conn().execute(
            "DELETE FROM sessions WHERE username = ?",
            params![username],
        )?;
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StashResult<u64> {
        let _g = self.lock.write().await;
        let affected = self
            .conn()
            .execute("DELETE FROM sessions WHERE expires_at <= ?", params![now])?;
        Ok(affected as u64)
    }

    async fn log_audit(&self, entry: AuditEntry) -> StashResult<()> {
        let _g = self.lock.write().await;
        self.conn().execute(
            "INSERT INTO audit_log (timestamp, action, key, actor, actor_type, result, ip, user_agent, value_size, request_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.timestamp,
                entry.action.as_str(),
                entry.key,
                entry.actor,
                entry.actor_type.as_str(),
                entry.result.as_str(),
                entry.ip,
                entry.user_agent,
                entry.value_size,
                entry.request_id,
            ],
        )?;
        Ok(())
    }

    async fn query_audit(&self, filter: AuditFilter) -> StashResult<AuditQueryResult> {
        let _g = self.lock.read().await;
        let conn = self.conn();

        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(key) = &filter.key {
            if let Some(prefix) = key.strip_suffix('*') {
                clauses.push("key LIKE ?".to_string());
                binds.push(Box::new(format!("{prefix}%")));
            } else {
                clauses.push("key = ?".to_string());
                binds.push(Box::new(key.clone()));
            }
        }
        if let Some(actor) = &filter.actor {
            clauses.push("actor = ?".to_string());
            binds.push(Box::new(actor.clone()));
        }
        if let Some(action) = filter.action {
            clauses.push("action = ?".to_string());
            binds.push(Box::new(action.as_str().to_string()));
        }
        if let Some(result) = filter.result {
            clauses.push("result = ?".to_string());
            binds.push(Box::new(result.as_str().to_string()));
        }
        if let Some(actor_type) = filter.actor_type {
            clauses.push("actor_type = ?".to_string());
            binds.push(Box::new(actor_type.as_str().to_string()));
        }
        if let Some(from) = filter.from {
            clauses.push("timestamp >= ?".to_string());
            binds.push(Box::new(from));
        }
        if let Some(to) = filter.to {
            clauses.push("timestamp <= ?".to_string());
            binds.push(Box::new(to));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let limit = filter
            .limit
            .unwrap_or(crate::types::AUDIT_QUERY_DEFAULT_LIMIT)
            .min(AUDIT_QUERY_MAX_LIMIT);
        let offset = filter.offset.unwrap_or(0);

        let count_sql = format!("SELECT COUNT(*) FROM audit_log {where_sql}");
        let total: i64 = conn.query_row(
            &count_sql,
            rusqlite::params_from_iter(binds.iter().map(|b| b.as_ref())),
            |row| row.get(0),
        )?;

        let page_sql = format!(
            "SELECT id, timestamp, action, key, actor, actor_type, result, ip, user_agent, value_size, request_id
             FROM audit_log {where_sql} ORDER BY timestamp DESC LIMIT ? OFFSET ?"
        );
        let mut page_binds: Vec<&dyn rusqlite::ToSql> =
            binds.iter().map(|b| b.as_ref()).collect();
        page_binds.push(&limit);
        page_binds.push(&offset);

        let mut stmt = conn.prepare(&page_sql)?;
        let entries = stmt
            .query_map(rusqlite::params_from_iter(page_binds), |row| {
                let action_raw: String = row.get(2)?;
                let actor_type_raw: String = row.get(5)?;
                let result_raw: String = row.get(6)?;
                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    action: AuditAction::from_str(&action_raw).unwrap_or(AuditAction::Read),
                    key: row.get(3)?,
                    actor: row.get(4)?,
                    actor_type: ActorType::from_str(&actor_type_raw).unwrap_or(ActorType::Public),
                    result: AuditResult::from_str(&result_raw).unwrap_or(AuditResult::NotFound),
                    ip: row.get(7)?,
                    user_agent: row.get(8)?,
                    value_size: row.get(9)?,
                    request_id: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AuditQueryResult {
            entries,
            total: total as u64,
            limit,
        })
    }

    async fn delete_audit_older_than(&self, cutoff: DateTime<Utc>) -> StashResult<u64> {
        let _g = self.lock.write().await;
        let affected = self.conn().execute(
            "DELETE FROM audit_log WHERE timestamp < ?",
            params![cutoff],
        )?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SqliteBackend {
        SqliteBackend::open(":memory:").unwrap()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let b = backend();
        let created = b.set_raw("app/name", b"hello".to_vec(), Format::Text).await.unwrap();
        assert!(created);
        let entry = b.get_raw("app/name").await.unwrap();
        assert_eq!(entry.value, b"hello");
        assert_eq!(entry.format, Format::Text);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let b = backend();
        assert!(matches!(b.get_raw("nope").await, Err(StashError::NotFound)));
    }

    #[tokio::test]
    async fn set_reports_created_vs_updated() {
        let b = backend();
        assert!(b.set_raw("k", b"a".to_vec(), Format::Text).await.unwrap());
        assert!(!b.set_raw("k", b"b".to_vec(), Format::Text).await.unwrap());
        assert_eq!(b.get_raw("k").await.unwrap().value, b"b");
    }

    #[tokio::test]
    async fn delete_missing_key_is_not_found() {
        let b = backend();
        assert!(matches!(b.delete("nope").await, Err(StashError::NotFound)));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let b = backend();
        b.set_raw("k", b"a".to_vec(), Format::Text).await.unwrap();
        b.delete("k").await.unwrap();
        assert!(matches!(b.get_raw("k").await, Err(StashError::NotFound)));
    }

    #[tokio::test]
    async fn list_orders_by_updated_at_descending() {
        let b = backend();
        b.set_raw("a", b"1".to_vec(), Format::Text).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        b.set_raw("b", b"2".to_vec(), Format::Text).await.unwrap();
        let entries = b.list_raw(ListFilter::All).await.unwrap();
        assert_eq!(entries[0].key, "b");
        assert_eq!(entries[1].key, "a");
    }

    #[tokio::test]
    async fn list_filters_by_secret_flag() {
        let b = backend();
        b.set_raw("secrets/db", b"s".to_vec(), Format::Text).await.unwrap();
        b.set_raw("app/name", b"n".to_vec(), Format::Text).await.unwrap();
        let secrets = b.list_raw(ListFilter::SecretsOnly).await.unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].key, "secrets/db");
        let keys = b.list_raw(ListFilter::KeysOnly).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key, "app/name");
    }

    #[tokio::test]
    async fn set_with_version_succeeds_on_match_and_conflicts_on_mismatch() {
        let b = backend();
        b.set_raw("k", b"a".to_vec(), Format::Text).await.unwrap();
        let v1 = b.get_raw("k").await.unwrap().updated_at;

        match b
            .set_raw_with_version("k", b"b".to_vec(), Format::Text, v1)
            .await
            .unwrap()
        {
            SetVersionOutcome::Applied => {}
            SetVersionOutcome::Conflict(_) => panic!("expected Applied"),
        }

        match b
            .set_raw_with_version("k", b"c".to_vec(), Format::Text, v1)
            .await
            .unwrap()
        {
            SetVersionOutcome::Conflict(current) => assert_eq!(current.value, b"b"),
            SetVersionOutcome::Applied => panic!("expected Conflict"),
        }
    }

    #[tokio::test]
    async fn set_with_version_on_missing_key_is_not_found() {
        let b = backend();
        let result = b
            .set_raw_with_version("nope", b"x".to_vec(), Format::Text, Utc::now())
            .await;
        assert!(matches!(result, Err(StashError::NotFound)));
    }

    #[tokio::test]
    async fn sessions_round_trip_and_expire() {
        let b = backend();
        let session = b
            .create_session("alice", Duration::from_secs(3600))
            .await
            .unwrap();
        let fetched = b.get_session(&session.token).await.unwrap();
        assert_eq!(fetched.unwrap().username, "alice");

        b.delete_session(&session.token).await.unwrap();
        assert!(b.get_session(&session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_expired_sessions_sweeps_past_entries() {
        let b = backend();
        b.create_session("alice", Duration::from_secs(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let swept = b.delete_expired_sessions(Utc::now()).await.unwrap();
        assert_eq!(swept, 1);
    }

    #[tokio::test]
    async fn audit_query_filters_and_counts() {
        let b = backend();
        for i in 0..3 {
            b.log_audit(AuditEntry {
                id: 0,
                timestamp: Utc::now(),
                action: AuditAction::Read,
                key: format!("app/k{i}"),
                actor: "alice".to_string(),
                actor_type: ActorType::User,
                result: AuditResult::Success,
                ip: None,
                user_agent: None,
                value_size: Some(10),
                request_id: None,
            })
            .await
            .unwrap();
        }
        let result = b
            .query_audit(AuditFilter {
                actor: Some("alice".to_string()),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.entries.len(), 2);
    }

    #[tokio::test]
    async fn delete_audit_older_than_sweeps_old_entries() {
        let b = backend();
        b.log_audit(AuditEntry {
            id: 0,
            timestamp: Utc::now() - chrono::Duration::days(100),
            action: AuditAction::Read,
            key: "k".to_string(),
            actor: "alice".to_string(),
            actor_type: ActorType::User,
            result: AuditResult::Success,
            ip: None,
            user_agent: None,
            value_size: None,
            request_id: None,
        })
        .await
        .unwrap();
        let swept = b
            .delete_audit_older_than(Utc::now() - chrono::Duration::days(90))
            .await
            .unwrap();
        assert_eq!(swept, 1);
    }
}
