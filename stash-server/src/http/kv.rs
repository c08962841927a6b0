//! `/kv` handlers: get, put, delete, list, history, restore.

use crate::error::ApiError;
use crate::http::util::{audit, authenticate, require_read, require_write};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use stash_core::error::StashError;
use stash_core::events::ChangeAction;
use stash_core::git::{CommitRequest, Operation};
use stash_core::types::ListFilter;

pub async fn get_kv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    require_read(&actor, &key)?;

    let result = state.engine.get_with_format(&key).await;
    let status = match &result {
        Ok(_) => 200,
        Err(StashError::NotFound) => 404,
        Err(StashError::SecretsNotConfigured) => 400,
        Err(_) => 500,
    };
    audit(&state, &headers, "GET", status, &key, &actor, result.as_ref().ok().map(|(v, _)| v.len() as u64)).await;

    let (value, format) = result?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream"), ("x-stash-format", format.as_str())],
        value,
    )
        .into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct PutParams {
    #[serde(default)]
    pub format: Option<String>,
    /// `updated_at` the caller last observed; when present, the write is
    /// rejected with a 409 `Conflict` if the stored value has moved on.
    #[serde(default)]
    pub expected_version: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn put_kv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Query(params): Query<PutParams>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    require_write(&actor, &key)?;

    let format = headers
        .get("x-stash-format")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(params.format)
        .unwrap_or_default();

    let created = matches!(state.engine.get_info(&key).await, Err(StashError::NotFound));

    let write_result = match params.expected_version {
        Some(expected) => state
            .engine
            .set_with_version(&key, body.to_vec(), &format, expected)
            .await,
        None => state.engine.set(&key, body.to_vec(), &format).await.map(|_| ()),
    };

    let status = match &write_result {
        Ok(()) if created => 201,
        Ok(()) => 200,
        Err(StashError::Conflict(_)) => 409,
        Err(StashError::SecretsNotConfigured) => 400,
        Err(StashError::InvalidZkPayload) => 400,
        Err(_) => 500,
    };
    audit(&state, &headers, "PUT", status, &key, &actor, Some(body.len() as u64)).await;
    write_result?;

    state.events.publish(&key, if created { ChangeAction::Create } else { ChangeAction::Update });
    if state.git_enabled {
        let format_tag = stash_core::format::Format::parse_or_default(&format);
        if let Err(err) = state
            .git
            .commit(CommitRequest {
                key: key.clone(),
                value: body.to_vec(),
                operation: Operation::Set,
                format: format_tag,
                author: actor_label(&actor),
            })
            .await
        {
            tracing::warn!(key = %key, error = %err, "git commit after set failed");
        }
    }

    let code = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok(code.into_response())
}

pub async fn delete_kv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    require_write(&actor, &key)?;

    let result = state.engine.delete(&key).await;
    let status = match &result {
        Ok(()) => 204,
        Err(StashError::NotFound) => 404,
        Err(_) => 500,
    };
    audit(&state, &headers, "DELETE", status, &key, &actor, None).await;
    result?;

    state.events.publish(&key, ChangeAction::Delete);
    if state.git_enabled {
        if let Err(err) = state.git.delete(&key, &actor_label(&actor)).await {
            tracing::warn!(key = %key, error = %err, "git commit after delete failed");
        }
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub filter: String,
}

pub async fn list_kv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    let filter = ListFilter::parse_or_default(&params.filter);

    let entries = state.engine.list(filter).await?;
    let visible: Vec<_> = entries
        .into_iter()
        .filter(|e| e.key.starts_with(&params.prefix))
        .filter(|e| actor.acl.as_ref().is_some_and(|acl| acl.can_read(&e.key)))
        .collect();

    audit(&state, &headers, "GET", 200, "", &actor, None).await;
    Ok(Json(visible).into_response())
}

pub async fn history_kv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    require_read(&actor, &key)?;

    if !state.git_enabled {
        return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }

    const HISTORY_LIMIT: usize = 100;
    let revisions = state.git.history(&key, HISTORY_LIMIT).await?;
    audit(&state, &headers, "GET", 200, &key, &actor, None).await;
    Ok(Json(revisions).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RestoreParams {
    pub rev: String,
}

pub async fn restore_kv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Query(params): Query<RestoreParams>,
) -> Result<Response, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    require_write(&actor, &key)?;

    if !state.git_enabled {
        return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }

    let created = matches!(state.engine.get_info(&key).await, Err(StashError::NotFound));

    stash_core::git::restore(state.git.as_ref(), &state.engine, &key, &params.rev, &actor_label(&actor))
        .await?;
    audit(&state, &headers, "PUT", 200, &key, &actor, None).await;
    state.events.publish(&key, if created { ChangeAction::Create } else { ChangeAction::Update });

    Ok(StatusCode::OK.into_response())
}

fn actor_label(actor: &stash_core::authz::ResolvedActor) -> String {
    if actor.display.is_empty() {
        "public".to_string()
    } else {
        actor.display.clone()
    }
}
