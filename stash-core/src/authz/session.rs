//! Session lifecycle: login, logout, and the cookie names/TTLs the HTTP
//! shell needs to know about.

use super::config::{self, AuthConfig};
use crate::error::{StashError, StashResult};
use crate::storage::StorageEngine;
use crate::types::Session;
use std::sync::Arc;
use std::time::Duration;

/// Cookie names a session may arrive under: a plain name and the
/// `__Host-`-prefixed variant some deployments require.
pub const SESSION_COOKIE_NAMES: [&str; 2] = ["stash_session", "__Host-stash_session"];

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 3600);

/// How often the expired-session sweep runs.
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Verify credentials and create a new session.
pub async fn login(
    storage: &Arc<dyn StorageEngine>,
    auth: &AuthConfig,
    username: &str,
    password: &str,
) -> StashResult<Session> {
    let user = auth.user(username).ok_or(StashError::Unauthorized)?;
    if !config::verify_password(password, &user.password_hash) {
        return Err(StashError::Unauthorized);
    }
    storage.create_session(username, DEFAULT_SESSION_TTL).await
}

/// Destroy a single session token.
pub async fn logout(storage: &Arc<dyn StorageEngine>, token: &str) -> StashResult<()> {
    storage.delete_session(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::config::parse;
    use crate::storage::sqlite::SqliteBackend;

    fn auth() -> AuthConfig {
        let hash = config::hash_password("hunter2").unwrap();
        parse(&format!(
            r#"
            [[users]]
            name = "alice"
            password_hash = "{hash}"
            permissions = [{{ prefix = "*", access = "rw" }}]
            "#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn login_succeeds_with_correct_password() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let session = login(&storage, &auth(), "alice", "hunter2").await.unwrap();
        assert_eq!(session.username, "alice");
    }

    #[tokio::test]
    async fn login_fails_with_wrong_password() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let result = login(&storage, &auth(), "alice", "wrong").await;
        assert!(matches!(result, Err(StashError::Unauthorized)));
    }

    #[tokio::test]
    async fn login_fails_for_unknown_user() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let result = login(&storage, &auth(), "bob", "hunter2").await;
        assert!(matches!(result, Err(StashError::Unauthorized)));
    }

    #[tokio::test]
    async fn logout_deletes_the_session() {
        let storage: Arc<dyn StorageEngine> = Arc::new(SqliteBackend::open(":memory:").unwrap());
        let session = login(&storage, &auth(), "alice", "hunter2").await.unwrap();
        logout(&storage, &session.token).await.unwrap();
        assert!(storage.get_session(&session.token).await.unwrap().is_none());
    }
}
