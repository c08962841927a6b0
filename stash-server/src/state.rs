//! Shared application state handed to every axum handler.

use stash_core::admission::{LoginAttemptBound, RateLimiter};
use stash_core::authz::Authorizer;
use stash_core::engine::Engine;
use stash_core::events::EventBus;
use stash_core::git::GitCollaborator;
use stash_core::storage::StorageEngine;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

pub struct Inner {
    pub engine: Engine,
    pub storage: Arc<dyn StorageEngine>,
    pub authorizer: Authorizer,
    pub git: Arc<dyn GitCollaborator>,
    pub events: EventBus,
    pub rate_limiter: RateLimiter,
    pub login_bound: LoginAttemptBound,
    pub audit_enabled: bool,
    pub git_enabled: bool,
    pub started_at: Instant,
}

/// Cheaply-cloneable handle `axum::extract::State` carries into handlers.
#[derive(Clone)]
pub struct AppState(Arc<Inner>);

impl AppState {
    pub fn new(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }
}

impl Deref for AppState {
    type Target = Inner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
