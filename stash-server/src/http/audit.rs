//! `POST /audit/query` — admin-only audit log search.

use crate::error::ApiError;
use crate::http::util::authenticate;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use stash_core::audit;
use stash_core::types::AuditFilter;

pub async fn query_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(filter): Json<AuditFilter>,
) -> Result<Json<stash_core::types::AuditQueryResult>, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    let result = audit::query(&state.storage, Some(&actor), filter).await?;
    Ok(Json(result))
}
