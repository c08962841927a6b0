//! Router assembly: wires every route onto `AppState` and layers in
//! request-body size and global concurrency limits.

pub mod audit;
pub mod auth;
pub mod kv;
pub mod ping;
pub mod subscribe;
pub mod util;


use crate::state::AppState;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use std::time::Instant;
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;

/// Default cap on a single request body (a secret value, a config blob).
const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Default cap on requests in flight across the whole server.
const DEFAULT_CONCURRENCY_LIMIT: usize = 1000;

async fn metrics_handler() -> impl IntoResponse {
    match crate::metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping::ping))
        .route("/metrics", get(metrics_handler))
        .route("/", get(auth::index_page))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/audit", get(auth::audit_page))
        .route("/audit/query", post(audit::query_audit))
        .route("/kv/", get(kv::list_kv))
        .route("/kv/history/{*key}", get(kv::history_kv))
        .route("/kv/restore/{*key}", put(kv::restore_kv))
        .route("/kv/subscribe/{*pattern}", get(subscribe::subscribe_kv))
        .route(
            "/kv/{*key}",
            get(kv::get_kv).put(kv::put_kv).delete(kv::delete_kv),
        )
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(DEFAULT_BODY_LIMIT_BYTES))
                .layer(ConcurrencyLimitLayer::new(DEFAULT_CONCURRENCY_LIMIT))
                .layer(middleware::from_fn_with_state(state.clone(), rate_limit_mw))
                .layer(middleware::from_fn(metrics_mw)),
        )
        .with_state(state)
}

/// Derives a rate-limit identity the same way `util::authenticate` would,
/// but tolerates an unresolvable credential rather than failing the
/// request here — an invalid token still gets rate-limited by IP, and the
/// real 401 is raised downstream by the handler.
async fn rate_limit_mw(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let identity = util::bearer_token(request.headers())
        .map(|t| stash_core::authz::mask_token(&t))
        .or_else(|| util::session_cookie(request.headers()))
        .or_else(|| util::client_ip(request.headers()))
        .unwrap_or_else(|| "unknown".to_string());

    if !state.rate_limiter.check(&identity).await {
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }
    next.run(request).await
}

async fn metrics_mw(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    crate::metrics::observe_request(&route, &method, response.status().as_u16(), start.elapsed().as_secs_f64());
    response
}
