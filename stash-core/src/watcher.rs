//! Configuration hot-reload: watches the auth config file, reloads and
//! validates it on change, and selectively invalidates sessions.

use crate::authz::{AuthConfig, Authorizer, config};
use crate::error::StashResult;
use crate::storage::StorageEngine;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Watches a config file's parent directory (so editors that save via
/// rename are still observed) and reloads on relevant changes.
pub struct ConfigWatcher {
    authorizer: Authorizer,
    storage: Arc<dyn StorageEngine>,
    path: PathBuf,
}

impl ConfigWatcher {
    pub fn new(authorizer: Authorizer, storage: Arc<dyn StorageEngine>, path: PathBuf) -> Self {
        Self {
            authorizer,
            storage,
            path,
        }
    }

    /// Reload the config file now, applying the same validate-or-preserve
    /// and selective-invalidation semantics the watcher and `SIGHUP` use.
    pub async fn reload(&self) {
        let previous = self.authorizer.current().await;
        match config::load(&self.path) {
            Ok(next) => {
                invalidate_changed_sessions(&self.storage, &previous, &next).await;
                self.authorizer.replace(next).await;
                info!(path = %self.path.display(), "authorization config reloaded");
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "config reload failed, keeping previous state");
            }
        }
    }

    /// Start watching the config file in the background. Returns the
    /// underlying `notify` watcher, which must be kept alive for as long
    /// as watching should continue.
    pub fn spawn_watch(self: Arc<Self>) -> StashResult<RecommendedWatcher> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let target = self.path.clone();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if !event.paths.iter().any(|p| p == &target) {
                return;
            }
            if matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) {
                let _ = tx.send(());
            }
        })
        .map_err(|e| crate::error::StashError::Internal(format!("config watcher init: {e}")))?;

        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| {
                crate::error::StashError::Internal(format!(
                    "watching {}: {e}",
                    parent.display()
                ))
            })?;

        let this = self.clone();
        tokio::spawn(async move {
            const DEBOUNCE: Duration = Duration::from_millis(200);
            while rx.recv().await.is_some() {
                tokio::time::sleep(DEBOUNCE).await;
                while rx.try_recv().is_ok() {}
                this.reload().await;
            }
        });

        Ok(watcher)
    }

    /// Install a `SIGHUP` handler that triggers a manual reload with
    /// identical semantics to the file watcher.
    #[cfg(unix)]
    pub fn spawn_sighup_handler(self: Arc<Self>) -> StashResult<()> {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sighup = signal(SignalKind::hangup())
            .map_err(|e| crate::error::StashError::Internal(format!("sighup handler: {e}")))?;
        tokio::spawn(async move {
            while sighup.recv().await.is_some() {
                self.reload().await;
            }
        });
        Ok(())
    }
}

/// Compute the session-affecting change set between two configs and
/// invalidate sessions per the selective-invalidation rules: a removed
/// user or a changed password hash drops that user's sessions; a
/// permissions-only or admin-only change keeps them; token changes never
/// invalidate anything.
async fn invalidate_changed_sessions(
    storage: &Arc<dyn StorageEngine>,
    previous: &AuthConfig,
    next: &AuthConfig,
) {
    for old_user in &previous.users {
        let should_invalidate = match next.user(&old_user.name) {
            None => true,
            Some(new_user) => new_user.password_hash != old_user.password_hash,
        };
        if should_invalidate {
            if let Err(err) = storage.delete_sessions_by_username(&old_user.name).await {
                warn!(user = %old_user.name, error = %err, "failed to invalidate sessions after config reload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::config::parse;
    use crate::storage::sqlite::SqliteBackend;
    use std::time::Duration as StdDuration;

    fn config_with(users: &str) -> AuthConfig {
        parse(users).unwrap()
    }

    #[tokio::test]
    async fn removed_user_loses_sessions() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        storage
            .create_session("alice", StdDuration::from_secs(3600))
            .await
            .unwrap();

        let previous = config_with(
            r#"[[users]]
            name = "alice"
            password_hash = "h""#,
        );
        let next = AuthConfig {
            users: vec![],
            tokens: vec![crate::authz::Token {
                token: "keep-alive".to_string(),
                acl: Default::default(),
            }],
        };

        invalidate_changed_sessions(&storage, &previous, &next).await;
        assert_eq!(
            storage
                .delete_expired_sessions(chrono::Utc::now() + chrono::Duration::days(1))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn password_change_invalidates_sessions() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let session = storage
            .create_session("alice", StdDuration::from_secs(3600))
            .await
            .unwrap();

        let previous = config_with(
            r#"[[users]]
            name = "alice"
            password_hash = "old""#,
        );
        let next = config_with(
            r#"[[users]]
            name = "alice"
            password_hash = "new""#,
        );

        invalidate_changed_sessions(&storage, &previous, &next).await;
        assert!(
            storage
                .get_session(&session.token)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn permissions_only_change_keeps_sessions() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let session = storage
            .create_session("alice", StdDuration::from_secs(3600))
            .await
            .unwrap();

        let previous = config_with(
            r#"[[users]]
            name = "alice"
            password_hash = "h"
            permissions = [{ prefix = "*", access = "r" }]"#,
        );
        let next = config_with(
            r#"[[users]]
            name = "alice"
            password_hash = "h"
            admin = true
            permissions = [{ prefix = "*", access = "rw" }]"#,
        );

        invalidate_changed_sessions(&storage, &previous, &next).await;
        assert!(
            storage
                .get_session(&session.token)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn unrelated_user_sessions_survive() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let bob_session = storage
            .create_session("bob", StdDuration::from_secs(3600))
            .await
            .unwrap();

        let previous = config_with(
            r#"[[users]]
            name = "alice"
            password_hash = "old"

            [[users]]
            name = "bob"
            password_hash = "h""#,
        );
        let next = config_with(
            r#"[[users]]
            name = "alice"
            password_hash = "new"

            [[users]]
            name = "bob"
            password_hash = "h""#,
        );

        invalidate_changed_sessions(&storage, &previous, &next).await;
        assert!(
            storage
                .get_session(&bob_session.token)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn reload_preserves_state_on_invalid_file() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let initial = config_with(
            r#"[[users]]
            name = "alice"
            password_hash = "h""#,
        );
        let authorizer = Authorizer::new(initial);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.toml");
        std::fs::write(&path, "not valid toml {{{").unwrap();

        let watcher = ConfigWatcher::new(authorizer.clone(), storage, path);
        watcher.reload().await;

        assert_eq!(authorizer.current().await.users.len(), 1);
    }
}
