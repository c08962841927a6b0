//! `/login`, `/logout`, and the minimal server-rendered pages that
//! exercise cookie-session auth from a browser. Not a UI build-out —
//! just enough surface to log in, look around, and log out.

use crate::error::ApiError;
use crate::http::util::session_cookie;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use stash_core::authz::{self, DEFAULT_SESSION_TTL, SESSION_COOKIE_NAMES};
use stash_core::error::StashError;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let _permit = state
        .login_bound
        .try_acquire()
        .ok_or(ApiError(StashError::Denied))?;

    let config = state.authorizer.current().await;
    let session = authz::login(&state.storage, &config, &req.username, &req.password).await?;

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        SESSION_COOKIE_NAMES[0],
        session.token,
        DEFAULT_SESSION_TTL.as_secs(),
    );
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "username": session.username })),
    )
        .into_response())
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(token) = session_cookie(&headers) {
        authz::logout(&state.storage, &token).await?;
    }
    let cookie = format!("{}=; Path=/; HttpOnly; Max-Age=0", SESSION_COOKIE_NAMES[0]);
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)]).into_response())
}

pub async fn login_page() -> Html<&'static str> {
    Html(
        r#"<!doctype html><html><head><title>Stash</title></head><body>
<form method="post" action="/login" onsubmit="event.preventDefault();
  fetch('/login', {method:'POST', headers:{'content-type':'application/json'},
    body: JSON.stringify({username: this.username.value, password: this.password.value})})
  .then(r => { if (r.ok) location.href = '/'; });">
<input name="username" placeholder="username">
<input name="password" type="password" placeholder="password">
<button type="submit">Log in</button>
</form>
</body></html>"#,
    )
}

pub async fn index_page() -> Html<String> {
    Html(format!(
        r#"<!doctype html><html><head><title>Stash</title></head><body>
<h1>Stash</h1>
<p>Version {}</p>
<p><a href="/kv/">Browse keys</a> &middot; <a href="/audit">Audit log</a> &middot;
<a href="/login">Log in</a> &middot; <form style="display:inline" method="post" action="/logout">
<button type="submit">Log out</button></form></p>
</body></html>"#,
        env!("CARGO_PKG_VERSION"),
    ))
}

pub async fn audit_page() -> Html<&'static str> {
    Html(
        r#"<!doctype html><html><head><title>Stash audit log</title></head><body>
<h1>Audit log</h1>
<pre id="out">loading...</pre>
<script>
fetch('/audit/query', {method:'POST', headers:{'content-type':'application/json'}, body: '{}'})
  .then(r => r.json()).then(j => { document.getElementById('out').textContent = JSON.stringify(j, null, 2); })
  .catch(() => { document.getElementById('out').textContent = 'unavailable'; });
</script>
</body></html>"#,
    )
}
