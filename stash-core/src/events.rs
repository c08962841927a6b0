//! Change-event bus: best-effort notification of key mutations for
//! `GET /kv/subscribe/{pattern}`. No persistent queue — a subscriber that
//! falls behind skips ahead rather than blocking publishers, and a
//! disconnected subscriber's receiver is simply dropped by the broadcast
//! channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_BUFFER: usize = 256;

/// What happened to a key. Mirrors the audit log's action vocabulary
/// (see `audit::action_for`) so a subscriber sees the same create/update
/// distinction an admin would see in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// A single key-change notification.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub key: String,
    pub action: ChangeAction,
    pub timestamp: DateTime<Utc>,
}

/// Broadcasts every key change to all subscribers; each subscriber applies
/// its own pattern filter on the receiving side.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Create a bus with the given buffer, clamped to at least
    /// `DEFAULT_BUFFER` so a burst of writes doesn't immediately lag slow
    /// subscribers.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Publish a change. Silently drops the event if nobody is listening.
    pub fn publish(&self, key: &str, action: ChangeAction) {
        let _ = self.sender.send(ChangeEvent {
            key: key.to_string(),
            action,
            timestamp: Utc::now(),
        });
    }
}

/// A compiled subscription pattern: `*` matches everything, a trailing
/// `*` matches by prefix, anything else matches the key exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionPattern {
    All,
    Prefix(String),
    Exact(String),
}

impl SubscriptionPattern {
    pub fn parse(raw: &str) -> Self {
        if raw == "*" {
            Self::All
        } else if let Some(prefix) = raw.strip_suffix('*') {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Exact(raw.to_string())
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Exact(exact) => key == exact,
        }
    }
}

/// Wait for the next event matching `pattern`, transparently skipping past
/// lag (best-effort delivery) and non-matching events. Returns `None` once
/// the bus has no more publishers.
pub async fn recv_matching(
    rx: &mut broadcast::Receiver<ChangeEvent>,
    pattern: &SubscriptionPattern,
) -> Option<ChangeEvent> {
    loop {
        match rx.recv().await {
            Ok(event) if pattern.matches(&event.key) => return Some(event),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
