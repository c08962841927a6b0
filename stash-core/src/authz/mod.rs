//! Authorization: configuration loading, prefix ACLs, sessions, and
//! request-identity resolution.

pub mod acl;
pub mod config;
pub mod identity;
pub mod session;

pub use acl::{Access, AclEntry, Permission};
pub use config::{AuthConfig, Token, User};
pub use identity::{ResolvedActor, mask_token, public_actor, resolve_token, resolve_user};
pub use session::{DEFAULT_SESSION_TTL, SESSION_COOKIE_NAMES, SESSION_SWEEP_INTERVAL, login, logout};

use std::sync::Arc;
use tokio::sync::RwLock;

/// A hot-reloadable handle to the current authorization configuration,
/// shared between the HTTP layer and the config watcher.
#[derive(Clone)]
pub struct Authorizer {
    state: Arc<RwLock<AuthConfig>>,
}

impl Authorizer {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(config)),
        }
    }

    pub async fn current(&self) -> AuthConfig {
        self.state.read().await.clone()
    }

    pub async fn replace(&self, config: AuthConfig) {
        *self.state.write().await = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_swaps_the_visible_config() {
        let a = Authorizer::new(AuthConfig::default());
        assert!(a.current().await.users.is_empty());

        let updated = config::parse(
            r#"
            [[users]]
            name = "alice"
            password_hash = "h"
            "#,
        )
        .unwrap();
        a.replace(updated).await;
        assert_eq!(a.current().await.users.len(), 1);
    }
}
