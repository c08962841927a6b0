//! `GET /kv/subscribe/{pattern}` — server-sent events for key changes.

use crate::error::ApiError;
use crate::http::util::authenticate;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde_json::json;
use stash_core::events::SubscriptionPattern;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

pub async fn subscribe_kv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(pattern): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    let pattern = SubscriptionPattern::parse(&pattern);
    let rx = state.events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |item| {
        let event = item.ok()?;
        if !pattern.matches(&event.key) {
            return None;
        }
        if !actor.acl.as_ref().is_some_and(|acl| acl.can_read(&event.key)) {
            return None;
        }
        let payload = json!({
            "key": event.key,
            "action": event.action,
            "timestamp": event.timestamp,
        });
        Some(Ok(Event::default().event("change").data(payload.to_string())))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
