//! `GET /ping` — unauthenticated liveness check.

pub async fn ping() -> &'static str {
    "pong"
}
