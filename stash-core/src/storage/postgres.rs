//! Networked backend (PostgreSQL via `tokio-postgres`/`deadpool-postgres`).
//!
//! No in-process lock is used here: the database's own MVCC concurrency
//! control is the source of truth, so this backend is handed
//! [`EngineLock::networked`], a no-op.

use super::dialect::Dialect;
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
use deadpool_postgres::{ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::NoTls;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

const MAX_POOL_SIZE: usize = 10;

pub struct PostgresBackend {
    pool: Pool,
    lock: EngineLock,
    dialect: Dialect,
}

impl PostgresBackend {
    pub async fn connect(url: &str) -> StashResult<Self> {
        let pg_config = tokio_postgres::Config::from_str(url)
            .map_err(|e| StashError::InvalidConfig(format!("invalid postgres url: {e}")))?;

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = deadpool_postgres::Manager::from_config(pg_config, NoTls, manager_config);
        let pool = Pool::builder(manager)
            .max_size(MAX_POOL_SIZE)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StashError::Internal(format!("postgres pool: {e}")))?;

        let backend = Self {
            pool,
            lock: EngineLock::networked(),
            dialect: Dialect::Postgres,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    async fn run_migrations(&self) -> StashResult<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value BYTEA NOT NULL,
                    format TEXT NOT NULL DEFAULT 'text',
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    username TEXT NOT NULL,
                    expires_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
                CREATE INDEX IF NOT EXISTS idx_sessions_username ON sessions(username);
                CREATE TABLE IF NOT EXISTS audit_log (
                    id BIGSERIAL PRIMARY KEY,
                    timestamp TIMESTAMPTZ NOT NULL,
                    action TEXT NOT NULL,
                    key TEXT NOT NULL,
                    actor TEXT NOT NULL,
                    actor_type TEXT NOT NULL,
                    result TEXT NOT NULL,
                    ip TEXT,
                    user_agent TEXT,
                    value_size BIGINT,
                    request_id TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
                CREATE INDEX IF NOT EXISTS idx_audit_key ON audit_log(key);
                CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_log(actor);
                CREATE INDEX IF NOT EXISTS idx_audit_timestamp_key ON audit_log(timestamp, key);
                CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL
                );",
            )
            .await?;

        let has_format_column = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.columns WHERE table_name = 'kv' AND column_name = 'format')",
                &[],
            )
            .await?
            .get::<_, bool>(0);
        if !has_format_column {
            client
                .batch_execute("ALTER TABLE kv ADD COLUMN format TEXT NOT NULL DEFAULT 'text'")
                .await?;
        }

        client
            .execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (1, $1) ON CONFLICT (version) DO NOTHING",
                &[&Utc::now()],
            )
            .await?;
        Ok(())
    }

    fn compile(&self, portable_sql: &str) -> String {
        self.dialect.compile(portable_sql)
    }
}

fn row_to_entry(key: String, row: &tokio_postgres::Row) -> RawEntry {
    let value: Vec<u8> = row.get(0);
    let format_raw: String = row.get(1);
    RawEntry {
        key,
        value,
        format: Format::parse_or_default(&format_raw),
        created_at: row.get(2),
        updated_at: row.get(3),
    }
}

#[async_trait]
impl StorageEngine for PostgresBackend {
    async fn get_raw(&self, key: &str) -> StashResult<RawEntry> {
        let _g = self.lock.read().await;
        let client = self.pool.get().await?;
        let sql = self.compile("SELECT value, format, created_at, updated_at FROM kv WHERE key = ?");
        let row = client.query_opt(&sql, &[&key]).await?;
        row.map(|r| row_to_entry(key.to_string(), &r))
            .ok_or(StashError::NotFound)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, format: Format) -> StashResult<bool> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        let now = Utc::now();
        let sql = self.compile(
            "INSERT INTO kv (key, value, format, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, format = excluded.format, updated_at = excluded.updated_at
             RETURNING (created_at = updated_at)",
        );
        let format_str = format.as_str();
        let row = client
            .query_one(&sql, &[&key, &value, &format_str, &now, &now])
            .await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn set_raw_with_version(
        &self,
        key: &str,
        value: Vec<u8>,
        format: Format,
        expected_updated_at: DateTime<Utc>,
    ) -> StashResult<SetVersionOutcome> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        let now = Utc::now();
        let format_str = format.as_str();
        let sql = self.compile(
            "UPDATE kv SET value = ?, format = ?, updated_at = ? WHERE key = ? AND updated_at = ?",
        );
        let affected = client
            .execute(&sql, &[&value, &format_str, &now, &key, &expected_updated_at])
            .await?;
        if affected == 1 {
            return Ok(SetVersionOutcome::Applied);
        }

        let select_sql =
            self.compile("SELECT value, format, created_at, updated_at FROM kv WHERE key = ?");
        let current = client.query_opt(&select_sql, &[&key]).await?;
        match current {
            Some(row) => Ok(SetVersionOutcome::Conflict(row_to_entry(key.to_string(), &row))),
            None => Err(StashError::NotFound),
        }
    }

    async fn delete(&self, key: &str) -> StashResult<()> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        let sql = self.compile("DELETE FROM kv WHERE key = ?");
        let affected = client.execute(&sql, &[&key]).await?;
        if affected == 0 {
            return Err(StashError::NotFound);
        }
        Ok(())
    }

    async fn list_raw(&self, filter: ListFilter) -> StashResult<Vec<RawEntry>> {
        let _g = self.lock.read().await;
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT key, value, format, created_at, updated_at FROM kv ORDER BY updated_at DESC",
                &[],
            )
            .await?;
        let entries = rows
            .into_iter()
            .map(|row| {
                let key: String = row.get(0);
                row_to_entry(key, &row)
            })
            .collect();
        Ok(filter_entries(entries, filter))
    }

    async fn create_session(&self, username: &str, ttl: Duration) -> StashResult<Session> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        let token = Uuid::new_v4().to_string();
        let expires_at =
            Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));
        client
            .execute(
                "INSERT INTO sessions (token, username, expires_at) VALUES ($1, $2, $3)",
                &[&token, &username, &expires_at],
            )
            .await?;
        Ok(Session {
            token,
            username: username.to_string(),
            expires_at,
        })
    }

    async fn get_session(&self, token: &str) -> StashResult<Option<Session>> {
        let _g = self.lock.read().await;
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT username, expires_at FROM sessions WHERE token = $1",
                &[&token],
            )
            .await?;
        Ok(row
            .map(|r| Session {
                token: token.to_string(),
                username: r.get(0),
                expires_at: r.get(1),
            })
            .filter(|s| s.expires_at > Utc::now()))
    }

    async fn delete_session(&self, token: &str) -> StashResult<()> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM sessions WHERE token = $1", &[&token])
            .await?;
        Ok(())
    }

    async fn delete_all_sessions(&self) -> StashResult<()> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        client.execute("DELETE FROM sessions", &[]).await?;
        Ok(())
    }

    async fn delete_sessions_by_username(&self, username: &str) -> StashResult<()> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM sessions WHERE username = $1", &[&username])
            .await?;
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StashResult<u64> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM sessions WHERE expires_at <= $1", &[&now])
            .await?;
        Ok(affected)
    }

    async fn log_audit(&self, entry: AuditEntry) -> StashResult<()> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        let action = entry.action.as_str();
        let actor_type = entry.actor_type.as_str();
        let result = entry.result.as_str();
        let value_size = entry.value_size.map(|v| v as i64);
        client
            .execute(
                "INSERT INTO audit_log (timestamp, action, key, actor, actor_type, result, ip, user_agent, value_size, request_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &entry.timestamp,
                    &action,
                    &entry.key,
                    &entry.actor,
                    &actor_type,
                    &result,
                    &entry.ip,
                    &entry.user_agent,
                    &value_size,
                    &entry.request_id,
                ],
            )
            .await?;
        Ok(())
    }

    async fn query_audit(&self, filter: AuditFilter) -> StashResult<AuditQueryResult> {
        let _g = self.lock.read().await;
        let client = self.pool.get().await?;

        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<Box<dyn ToSql + Sync>> = Vec::new();

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
            .min(AUDIT_QUERY_MAX_LIMIT) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;

        let count_sql = self.compile(&format!("SELECT COUNT(*) FROM audit_log {where_sql}"));
        let count_params: Vec<&(dyn ToSql + Sync)> = binds.iter().map(|b| b.as_ref()).collect();
        let total: i64 = client.query_one(&count_sql, &count_params).await?.get(0);

        let page_sql = self.compile(&format!(
            "SELECT id, timestamp, action, key, actor, actor_type, result, ip, user_agent, value_size, request_id
             FROM audit_log {where_sql} ORDER BY timestamp DESC LIMIT ? OFFSET ?"
        ));
        let mut page_params: Vec<&(dyn ToSql + Sync)> = binds.iter().map(|b| b.as_ref()).collect();
        page_params.push(&limit);
        page_params.push(&offset);

        let rows = client.query(&page_sql, &page_params).await?;
        let entries = rows
            .into_iter()
            .map(|row| {
                let action_raw: String = row.get(2);
                let actor_type_raw: String = row.get(5);
                let result_raw: String = row.get(6);
                let value_size: Option<i64> = row.get(9);
                AuditEntry {
                    id: row.get(0),
                    timestamp: row.get(1),
                    action: AuditAction::from_str(&action_raw).unwrap_or(AuditAction::Read),
                    key: row.get(3),
                    actor: row.get(4),
                    actor_type: ActorType::from_str(&actor_type_raw).unwrap_or(ActorType::Public),
                    result: AuditResult::from_str(&result_raw).unwrap_or(AuditResult::NotFound),
                    ip: row.get(7),
                    user_agent: row.get(8),
                    value_size: value_size.map(|v| v as u64),
                    request_id: row.get(10),
                }
            })
            .collect();

        Ok(AuditQueryResult {
            entries,
            total: total as u64,
            limit: limit as u64,
        })
    }

    async fn delete_audit_older_than(&self, cutoff: DateTime<Utc>) -> StashResult<u64> {
        let _g = self.lock.write().await;
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM audit_log WHERE timestamp < $1", &[&cutoff])
            .await?;
        Ok(affected)
    }
}

impl From<deadpool_postgres::PoolError> for StashError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StashError::Internal(format!("postgres pool: {e}"))
    }
}
