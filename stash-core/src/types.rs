//! Shared data-model types: entry metadata, sessions, and audit entries.

use crate::format::Format;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata about a stored key, without the value bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub key: String,
    /// Length of the stored bytes, after any server-side encryption expansion.
    pub size: u64,
    pub format: Format,
    pub created_at: DateTime<Utc>,
    /// The optimistic-concurrency token; see `SetWithVersion`.
    pub updated_at: DateTime<Utc>,
    /// Derived: whether the key is a secret path.
    pub secret: bool,
    /// Derived: whether the stored value is a `$ZK$` envelope.
    pub zk_encrypted: bool,
}

/// Which subset of stored metadata a `List` call should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListFilter {
    #[default]
    All,
    SecretsOnly,
    KeysOnly,
}

impl ListFilter {
    pub fn parse_or_default(raw: &str) -> Self {
        match raw {
            "secrets" => Self::SecretsOnly,
            "keys" => Self::KeysOnly,
            _ => Self::All,
        }
    }

    /// Whether a given secret flag should be included under this filter.
    pub fn accepts(&self, is_secret: bool) -> bool {
        match self {
            Self::All => true,
            Self::SecretsOnly => is_secret,
            Self::KeysOnly => !is_secret,
        }
    }
}

/// A persisted login session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// The kind of mutating/reading operation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(()),
        }
    }
}

/// The outcome of a request, as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Denied,
    NotFound,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::NotFound => "not_found",
        }
    }

    /// Classify an HTTP status code: 2xx -> success; 401/403 -> denied;
    /// everything else -> not_found (a deliberate coarse catch-all,
    /// including 5xx).
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            401 | 403 => Self::Denied,
            _ => Self::NotFound,
        }
    }
}

impl std::str::FromStr for AuditResult {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "denied" => Ok(Self::Denied),
            "not_found" => Ok(Self::NotFound),
            _ => Err(()),
        }
    }
}

/// The kind of identity that performed an audited request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    Token,
    Public,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Token => "token",
            Self::Public => "public",
        }
    }
}

impl std::str::FromStr for ActorType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "token" => Ok(Self::Token),
            "public" => Ok(Self::Public),
            _ => Err(()),
        }
    }
}

/// A single append-only audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(default)]
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub key: String,
    pub actor: String,
    pub actor_type: ActorType,
    pub result: AuditResult,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub value_size: Option<u64>,
    pub request_id: Option<String>,
}

/// Filter parameters for `QueryAudit`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    /// Key prefix match (pattern ending in `*` is a prefix, otherwise exact).
    pub key: Option<String>,
    pub actor: Option<String>,
    pub action: Option<AuditAction>,
    pub result: Option<AuditResult>,
    pub actor_type: Option<ActorType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// The default and hard cap on a single audit query page.
pub const AUDIT_QUERY_DEFAULT_LIMIT: u64 = 10_000;
pub const AUDIT_QUERY_MAX_LIMIT: u64 = 10_000;

/// Result of `QueryAudit`: the current page plus the total matching count.
#[derive(Debug, Clone, Serialize)]
pub struct AuditQueryResult {
    pub entries: Vec<AuditEntry>,
    pub total: u64,
    pub limit: u64,
}
