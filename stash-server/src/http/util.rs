//! Header/cookie extraction, actor resolution, and the audit-logging
//! helper shared by every handler.

use crate::state::AppState;
use axum::http::HeaderMap;
use stash_core::audit::{self, RequestFacts};
use stash_core::authz::{ResolvedActor, public_actor, resolve_token, resolve_user};
use stash_core::error::{StashError, StashResult};
use stash_core::types::ActorType;

/// Extract a bearer token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

/// Extract a session token from any of the recognized session cookie
/// names, hand-parsed out of the `Cookie` header (no `axum-extra`
/// dependency for this one lookup).
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        let (name, value) = pair.split_once('=')?;
        if stash_core::authz::SESSION_COOKIE_NAMES.contains(&name) {
            return Some(value.to_string());
        }
    }
    None
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

/// Resolve the acting identity for a request: a bearer token takes
/// priority over a session cookie, which takes priority over the public
/// fallback. A bearer token or session that doesn't resolve to a known
/// credential is `Unauthorized`, not silently treated as public.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> StashResult<ResolvedActor> {
    let config = state.authorizer.current().await;

    if let Some(token) = bearer_token(headers) {
        return resolve_token(&config, &token).ok_or(StashError::Unauthorized);
    }

    if let Some(session_token) = session_cookie(headers) {
        let session = state
            .storage
            .get_session(&session_token)
            .await?
            .ok_or(StashError::Unauthorized)?;
        if session.expires_at < chrono::Utc::now() {
            return Err(StashError::Unauthorized);
        }
        return resolve_user(&config, &session.username).ok_or(StashError::Unauthorized);
    }

    Ok(public_actor(&config))
}

/// An identity key for rate limiting: masked token, username, or client IP.
pub fn rate_limit_identity(actor: &ResolvedActor, headers: &HeaderMap) -> String {
    match actor.kind {
        ActorType::Public => client_ip(headers).unwrap_or_else(|| "unknown".to_string()),
        _ => actor.display.clone(),
    }
}

pub fn require_read(actor: &ResolvedActor, key: &str) -> StashResult<()> {
    match &actor.acl {
        Some(acl) if acl.can_read(key) => Ok(()),
        _ => Err(StashError::Denied),
    }
}

pub fn require_write(actor: &ResolvedActor, key: &str) -> StashResult<()> {
    match &actor.acl {
        Some(acl) if acl.can_write(key) => Ok(()),
        _ => Err(StashError::Denied),
    }
}

/// Record one audited request, if audit logging is enabled. Failures are
/// logged by `stash_core::audit::record` itself and never propagated.
#[allow(clippy::too_many_arguments)]
pub async fn audit(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    status: u16,
    key: &str,
    actor: &ResolvedActor,
    value_size: Option<u64>,
) {
    if !state.audit_enabled {
        return;
    }
    let entry = audit::build_entry(RequestFacts {
        method,
        status,
        key,
        actor: if actor.display.is_empty() {
            "public"
        } else {
            &actor.display
        },
        actor_type: actor.kind,
        value_size,
        ip: client_ip(headers),
        user_agent: user_agent(headers),
        request_id: request_id(headers),
    });
    audit::record(&state.storage, entry).await;
}
