//! Stash — single-binary HTTP key-value configuration service.

#![forbid(unsafe_code)]

mod error;
mod http;
mod metrics;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use stash_core::admission::{LoginAttemptBound, RateLimitConfig, RateLimiter};
use stash_core::authz::{self, AclEntry, AuthConfig, Authorizer, Permission, Token};
use stash_core::crypto::MasterKey;
use stash_core::engine::Engine;
use stash_core::events::EventBus;
use stash_core::git::{GitCollaborator, Git2Collaborator, NullCollaborator};
use stash_core::watcher::ConfigWatcher;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_EVENT_BUFFER: usize = 256;
const DEFAULT_MAX_CONCURRENT_LOGINS: usize = 8;
const DEFAULT_AUDIT_RETENTION_DAYS: u64 = 90;

#[derive(Parser)]
#[command(name = "stash-server")]
#[command(author, version, about = "Stash - single-binary HTTP key-value configuration service")]
struct Cli {
    /// Database URL: a filesystem path (or `:memory:`) selects the local
    /// backend, `postgres://...` selects the networked backend.
    #[arg(long, env = "STASH_DB", default_value = "stash.db")]
    db: String,

    /// Address to listen on.
    #[arg(long, env = "STASH_SERVER_ADDRESS", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Path to the authorization config file (TOML). If omitted, the
    /// server runs fully public: one `"*"` token with admin read-write.
    #[arg(long, env = "STASH_AUTH_FILE")]
    auth_file: Option<PathBuf>,

    /// Master key used to encrypt values under `secrets/`. Required to
    /// read or write any key under a `secrets` path segment.
    #[arg(long, env = "STASH_SECRETS_KEY")]
    secrets_key: Option<String>,

    /// Directory for the git version-history repository (created if
    /// absent). Defaults to a `history` directory next to the database.
    #[arg(long)]
    git_repo: Option<PathBuf>,

    /// Disable git-backed version history.
    #[arg(long)]
    no_git: bool,

    /// Disable audit logging.
    #[arg(long)]
    no_audit: bool,

    /// Audit log retention, in days.
    #[arg(long, default_value_t = DEFAULT_AUDIT_RETENTION_DAYS)]
    audit_retention_days: u64,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    metrics::register_metrics();

    info!(db = %cli.db, listen = %cli.listen, "starting stash-server");

    let storage = stash_core::storage::connect(&cli.db)
        .await
        .context("connecting to storage backend")?;

    let master_key = match cli.secrets_key {
        Some(raw) => Some(MasterKey::new(raw.into_bytes()).context("STASH_SECRETS_KEY")?),
        None => {
            warn!("no secrets key configured; writes to secrets/ paths will fail");
            None
        }
    };
    let engine = Engine::new(storage.clone(), master_key);

    let auth_config = match &cli.auth_file {
        Some(path) => authz::config::load(path).context("loading authorization config")?,
        None => {
            warn!("no auth file configured; running fully public with an admin `*` token");
            default_public_auth_config()
        }
    };
    let authorizer = Authorizer::new(auth_config);

    if let Some(path) = cli.auth_file.clone() {
        let watcher = Arc::new(ConfigWatcher::new(authorizer.clone(), storage.clone(), path));
        let _handle = watcher.clone().spawn_watch().context("starting config watcher")?;
        #[cfg(unix)]
        watcher.spawn_sighup_handler().context("installing SIGHUP handler")?;
    }

    spawn_session_sweep(storage.clone());

    let audit_enabled = !cli.no_audit;
    if audit_enabled {
        let retention = std::time::Duration::from_secs(cli.audit_retention_days * 24 * 3600);
        stash_core::audit::spawn_retention_sweep(storage.clone(), retention);
    }

    let git_enabled = !cli.no_git;
    let git: Arc<dyn GitCollaborator> = if git_enabled {
        let repo_path = cli
            .git_repo
            .unwrap_or_else(|| default_git_repo_path(&cli.db));
        std::fs::create_dir_all(&repo_path).context("creating git history directory")?;
        Arc::new(Git2Collaborator::open_or_init(&repo_path).context("opening git history repository")?)
    } else {
        Arc::new(NullCollaborator)
    };

    let app_state = state::AppState::new(state::Inner {
        engine,
        storage,
        authorizer,
        git,
        events: EventBus::new(DEFAULT_EVENT_BUFFER),
        rate_limiter: RateLimiter::new(RateLimitConfig::default()),
        login_bound: LoginAttemptBound::new(DEFAULT_MAX_CONCURRENT_LOGINS),
        audit_enabled,
        git_enabled,
        started_at: Instant::now(),
    });

    let router = http::build_router(app_state);
    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(addr = %cli.listen, "listening");
    axum::serve(listener, router).await.context("server exited")?;

    Ok(())
}

/// The ACL a deployment gets when no `--auth-file` is supplied: a single
/// public admin token, matching the "authentication is optional" framing
/// while a file that *is* supplied must still define at least one user
/// or token.
fn default_public_auth_config() -> AuthConfig {
    AuthConfig {
        users: vec![],
        tokens: vec![Token {
            token: authz::config::PUBLIC_TOKEN.to_string(),
            acl: AclEntry::new(
                vec![Permission {
                    prefix: "*".to_string(),
                    access: stash_core::authz::Access::ReadWrite,
                }],
                true,
            ),
        }],
    }
}

fn default_git_repo_path(db_url: &str) -> PathBuf {
    match db_url {
        url if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
            PathBuf::from("stash-history")
        }
        ":memory:" => PathBuf::from("stash-history"),
        path => PathBuf::from(path)
            .parent()
            .map(|p| p.join("stash-history"))
            .unwrap_or_else(|| PathBuf::from("stash-history")),
    }
}

fn spawn_session_sweep(storage: Arc<dyn stash_core::storage::StorageEngine>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(authz::SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match storage.delete_expired_sessions(chrono::Utc::now()).await {
                Ok(deleted) if deleted > 0 => info!(deleted, "swept expired sessions"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "session sweep failed"),
            }
        }
    });
}
