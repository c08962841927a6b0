//! Audit logging: turning request facts into log rows, access-gated
//! querying, and the retention sweep.

use crate::authz::ResolvedActor;
use crate::error::{StashError, StashResult};
use crate::storage::StorageEngine;
use crate::types::{AuditAction, AuditEntry, AuditFilter, AuditQueryResult, AuditResult, ActorType};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default audit retention: 90 days.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(90 * 24 * 3600);

/// How often the retention sweep runs (in addition to once at startup).
pub const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// The facts an HTTP handler has on hand once a request has been served,
/// from which an [`AuditEntry`] is synthesized.
pub struct RequestFacts<'a> {
    pub method: &'a str,
    pub status: u16,
    pub key: &'a str,
    pub actor: &'a str,
    pub actor_type: ActorType,
    /// Size of the value read or written, when the action succeeded and
    /// isn't a delete.
    pub value_size: Option<u64>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

/// Map an HTTP method and status to the audited action: `GET` is always a
/// read; `PUT` is a create on 201 and an update otherwise; `DELETE` is a
/// delete. Anything else (e.g. `POST /login`) is recorded as a read, since
/// it touches no key.
pub fn action_for(method: &str, status: u16) -> AuditAction {
    match method {
        "GET" | "HEAD" => AuditAction::Read,
        "PUT" | "POST" if status == 201 => AuditAction::Create,
        "PUT" | "POST" => AuditAction::Update,
        "DELETE" => AuditAction::Delete,
        _ => AuditAction::Read,
    }
}

/// Build the audit row for a completed request.
pub fn build_entry(facts: RequestFacts<'_>) -> AuditEntry {
    let action = action_for(facts.method, facts.status);
    let result = AuditResult::from_status(facts.status);
    let value_size = match (action, result) {
        (AuditAction::Delete, _) => None,
        (_, AuditResult::Success) => facts.value_size,
        _ => None,
    };
    AuditEntry {
        id: 0,
        timestamp: Utc::now(),
        action,
        key: facts.key.to_string(),
        actor: facts.actor.to_string(),
        actor_type: facts.actor_type,
        result,
        ip: facts.ip,
        user_agent: facts.user_agent,
        value_size,
        request_id: facts.request_id,
    }
}

/// Persist an audit entry. Logging failures are surfaced as a warning
/// rather than failing the request that triggered them.
pub async fn record(storage: &Arc<dyn StorageEngine>, entry: AuditEntry) {
    if let Err(err) = storage.log_audit(entry).await {
        warn!(error = %err, "failed to write audit log entry");
    }
}

/// Query the audit log, gated to admin actors only.
pub async fn query(
    storage: &Arc<dyn StorageEngine>,
    actor: Option<&ResolvedActor>,
    mut filter: AuditFilter,
) -> StashResult<AuditQueryResult> {
    let actor = actor.ok_or(StashError::Unauthorized)?;
    if !actor.is_admin() {
        return Err(StashError::Denied);
    }

    filter.limit = Some(
        filter
            .limit
            .unwrap_or(crate::types::AUDIT_QUERY_DEFAULT_LIMIT)
            .min(crate::types::AUDIT_QUERY_MAX_LIMIT),
    );
    storage.query_audit(filter).await
}

/// Run the retention sweep once, deleting entries older than `retention`.
pub async fn sweep_once(storage: &Arc<dyn StorageEngine>, retention: Duration) -> StashResult<u64> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::days(90));
    storage.delete_audit_older_than(cutoff).await
}

/// Spawn the background retention sweep: runs once immediately, then on
/// `RETENTION_SWEEP_INTERVAL`.
pub fn spawn_retention_sweep(
    storage: Arc<dyn StorageEngine>,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match sweep_once(&storage, retention).await {
                Ok(deleted) if deleted > 0 => {
                    info!(deleted, "swept expired audit log entries");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "audit retention sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::AclEntry;
    use crate::storage::sqlite::SqliteBackend;
    use crate::types::AuditFilter;

    fn admin_actor() -> ResolvedActor {
        ResolvedActor {
            kind: ActorType::Token,
            display: "token:admi****".to_string(),
            acl: Some(AclEntry::new(vec![], true)),
        }
    }

    fn non_admin_actor() -> ResolvedActor {
        ResolvedActor {
            kind: ActorType::User,
            display: "alice".to_string(),
            acl: Some(AclEntry::new(vec![], false)),
        }
    }

    #[test]
    fn action_for_maps_methods_and_status() {
        assert_eq!(action_for("GET", 200), AuditAction::Read);
        assert_eq!(action_for("PUT", 201), AuditAction::Create);
        assert_eq!(action_for("PUT", 200), AuditAction::Update);
        assert_eq!(action_for("DELETE", 200), AuditAction::Delete);
    }

    #[test]
    fn build_entry_omits_value_size_on_delete_and_failure() {
        let delete = build_entry(RequestFacts {
            method: "DELETE",
            status: 200,
            key: "app/x",
            actor: "alice",
            actor_type: ActorType::User,
            value_size: Some(10),
            ip: None,
            user_agent: None,
            request_id: None,
        });
        assert_eq!(delete.value_size, None);

        let denied_read = build_entry(RequestFacts {
            method: "GET",
            status: 403,
            key: "app/x",
            actor: "alice",
            actor_type: ActorType::User,
            value_size: Some(10),
            ip: None,
            user_agent: None,
            request_id: None,
        });
        assert_eq!(denied_read.value_size, None);
        assert_eq!(denied_read.result, AuditResult::Denied);

        let ok_read = build_entry(RequestFacts {
            method: "GET",
            status: 200,
            key: "app/x",
            actor: "alice",
            actor_type: ActorType::User,
            value_size: Some(10),
            ip: None,
            user_agent: None,
            request_id: None,
        });
        assert_eq!(ok_read.value_size, Some(10));
    }

    #[tokio::test]
    async fn query_requires_admin() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let result = query(&storage, None, AuditFilter::default()).await;
        assert!(matches!(result, Err(StashError::Unauthorized)));

        let result = query(&storage, Some(&non_admin_actor()), AuditFilter::default()).await;
        assert!(matches!(result, Err(StashError::Denied)));

        let result = query(&storage, Some(&admin_actor()), AuditFilter::default()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn query_clamps_limit_to_the_maximum() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let filter = AuditFilter {
            limit: Some(1_000_000),
            ..Default::default()
        };
        let result = query(&storage, Some(&admin_actor()), filter).await.unwrap();
        assert_eq!(result.limit, crate::types::AUDIT_QUERY_MAX_LIMIT);
    }

    #[tokio::test]
    async fn record_then_query_round_trips() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        record(
            &storage,
            build_entry(RequestFacts {
                method: "GET",
                status: 200,
                key: "app/x",
                actor: "alice",
                actor_type: ActorType::User,
                value_size: Some(4),
                ip: Some("127.0.0.1".to_string()),
                user_agent: None,
                request_id: Some("req-1".to_string()),
            }),
        )
        .await;

        let result = query(&storage, Some(&admin_actor()), AuditFilter::default())
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].key, "app/x");
    }

    #[tokio::test]
    async fn sweep_once_removes_entries_older_than_retention() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let mut old = build_entry(RequestFacts {
            method: "GET",
            status: 200,
            key: "app/x",
            actor: "alice",
            actor_type: ActorType::User,
            value_size: Some(1),
            ip: None,
            user_agent: None,
            request_id: None,
        });
        old.timestamp = Utc::now() - chrono::Duration::days(100);
        storage.log_audit(old).await.unwrap();

        let deleted = sweep_once(&storage, DEFAULT_RETENTION).await.unwrap();
        assert_eq!(deleted, 1);

        let result = query(&storage, Some(&admin_actor()), AuditFilter::default())
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 0);
    }
}
