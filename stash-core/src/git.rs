//! Git-backed version history. The core depends only on the four-operation
//! [`GitCollaborator`] contract; it never touches git internals directly,
//! so a disabled-git deployment just swaps in [`NullCollaborator`].

use crate::engine::Engine;
use crate::error::{StashError, StashResult};
use crate::format::Format;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git2::Repository;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Why a revision was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Set,
    Restore,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Restore => "restore",
        }
    }
}

/// A write to record.
pub struct CommitRequest {
    pub key: String,
    pub value: Vec<u8>,
    pub operation: Operation,
    pub format: Format,
    pub author: String,
}

/// A single entry of `History`.
#[derive(Debug, Clone, Serialize)]
pub struct Revision {
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub operation: Operation,
    pub format: Format,
    pub value: Vec<u8>,
}

/// The four operations the core treats git as a write-through audit sink
/// through. Every method is best-effort from the caller's point of view:
/// `Commit`/`Delete` failures are logged and never roll back the
/// underlying store.
#[async_trait]
pub trait GitCollaborator: Send + Sync {
    async fn commit(&self, request: CommitRequest) -> StashResult<()>;
    async fn delete(&self, key: &str, author: &str) -> StashResult<()>;
    async fn history(&self, key: &str, limit: usize) -> StashResult<Vec<Revision>>;
    async fn get_revision(&self, key: &str, rev: &str) -> StashResult<(Vec<u8>, Format)>;
}

/// No-op collaborator used when git versioning is disabled, so call sites
/// stay unconditional.
pub struct NullCollaborator;

#[async_trait]
impl GitCollaborator for NullCollaborator {
    async fn commit(&self, _request: CommitRequest) -> StashResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str, _author: &str) -> StashResult<()> {
        Ok(())
    }

    async fn history(&self, _key: &str, _limit: usize) -> StashResult<Vec<Revision>> {
        Err(StashError::Internal("git versioning is disabled".into()))
    }

    async fn get_revision(&self, _key: &str, _rev: &str) -> StashResult<(Vec<u8>, Format)> {
        Err(StashError::Internal("git versioning is disabled".into()))
    }
}

/// Real adapter storing one file per key (`key.val`, directories mirroring
/// slash segments) in an on-disk repository.
pub struct Git2Collaborator {
    repo: std::sync::Arc<Mutex<Repository>>,
}

impl Git2Collaborator {
    /// Open an existing repository at `path`, or initialize a new one.
    pub fn open_or_init(path: &Path) -> StashResult<Self> {
        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(_) => Repository::init(path).map_err(git_err)?,
        };
        Ok(Self {
            repo: std::sync::Arc::new(Mutex::new(repo)),
        })
    }
}

fn git_err(err: git2::Error) -> StashError {
    StashError::Internal(format!("git: {err}"))
}

/// `a/b/secrets/c` -> `a/b/secrets/c.val`.
fn key_to_path(key: &str) -> PathBuf {
    PathBuf::from(format!("{key}.val"))
}

fn commit_message(operation: Operation, key: &str, format: Format) -> String {
    format!("{} {} format={}", operation.as_str(), key, format.as_str())
}

fn delete_message(key: &str) -> String {
    format!("delete {key}")
}

fn parse_commit_message(message: &str) -> Option<(Operation, Format)> {
    let mut parts = message.split_whitespace();
    let operation = match parts.next()? {
        "set" => Operation::Set,
        "restore" => Operation::Restore,
        _ => return None,
    };
    let _key = parts.next()?;
    let format = parts
        .next()
        .and_then(|f| f.strip_prefix("format="))
        .map(Format::parse_or_default)
        .unwrap_or_default();
    Some((operation, format))
}

fn commit_blocking(
    repo: &Mutex<Repository>,
    key: &str,
    value: &[u8],
    message: String,
    author: &str,
) -> StashResult<()> {
    let repo = repo.lock().expect("git repository mutex poisoned");
    let workdir = repo
        .workdir()
        .ok_or_else(|| StashError::Internal("git repository has no working directory".into()))?
        .to_path_buf();

    let rel_path = key_to_path(key);
    let full_path = workdir.join(&rel_path);
    if let Some(parent) = full_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StashError::Internal(format!("git workdir write: {e}")))?;
    }
    std::fs::write(&full_path, value)
        .map_err(|e| StashError::Internal(format!("git workdir write: {e}")))?;

    let mut index = repo.index().map_err(git_err)?;
    index.add_path(&rel_path).map_err(git_err)?;
    index.write().map_err(git_err)?;
    let tree = repo
        .find_tree(index.write_tree().map_err(git_err)?)
        .map_err(git_err)?;

    write_commit(&repo, &tree, &message, author)
}

fn delete_blocking(repo: &Mutex<Repository>, key: &str, author: &str) -> StashResult<()> {
    let repo = repo.lock().expect("git repository mutex poisoned");
    let workdir = repo
        .workdir()
        .ok_or_else(|| StashError::Internal("git repository has no working directory".into()))?
        .to_path_buf();

    let rel_path = key_to_path(key);
    let full_path = workdir.join(&rel_path);
    if full_path.exists() {
        std::fs::remove_file(&full_path)
            .map_err(|e| StashError::Internal(format!("git workdir delete: {e}")))?;
    }

    let mut index = repo.index().map_err(git_err)?;
    let _ = index.remove_path(&rel_path);
    index.write().map_err(git_err)?;
    let tree = repo
        .find_tree(index.write_tree().map_err(git_err)?)
        .map_err(git_err)?;

    write_commit(&repo, &tree, &delete_message(key), author)
}

fn write_commit(
    repo: &Repository,
    tree: &git2::Tree<'_>,
    message: &str,
    author: &str,
) -> StashResult<()> {
    let signature = git2::Signature::now(author, "stash@localhost").map_err(git_err)?;
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.as_ref().map(|c| vec![c]).unwrap_or_default();
    repo.commit(Some("HEAD"), &signature, &signature, message, tree, &parents)
        .map_err(git_err)?;
    Ok(())
}

fn history_blocking(repo: &Mutex<Repository>, key: &str, limit: usize) -> StashResult<Vec<Revision>> {
    let repo = repo.lock().expect("git repository mutex poisoned");
    if repo.head().is_err() {
        return Ok(vec![]);
    }
    let rel_path = key_to_path(key);

    let mut revwalk = repo.revwalk().map_err(git_err)?;
    revwalk.push_head().map_err(git_err)?;
    revwalk.set_sorting(git2::Sort::TIME).map_err(git_err)?;

    let mut revisions = Vec::new();
    for oid in revwalk {
        if revisions.len() >= limit {
            break;
        }
        let oid = oid.map_err(git_err)?;
        let commit = repo.find_commit(oid).map_err(git_err)?;
        let tree = commit.tree().map_err(git_err)?;

        let touches_key = match commit.parent(0) {
            Ok(parent) => {
                let parent_tree = parent.tree().map_err(git_err)?;
                let diff = repo
                    .diff_tree_to_tree(Some(&parent_tree), Some(&tree), None)
                    .map_err(git_err)?;
                diff.deltas().any(|d| {
                    d.new_file().path() == Some(rel_path.as_path())
                        || d.old_file().path() == Some(rel_path.as_path())
                })
            }
            Err(_) => tree.get_path(&rel_path).is_ok(),
        };
        if !touches_key {
            continue;
        }

        let Some((operation, format)) = parse_commit_message(commit.message().unwrap_or("")) else {
            continue;
        };
        let Ok(entry) = tree.get_path(&rel_path) else {
            continue;
        };
        let blob = repo.find_blob(entry.id()).map_err(git_err)?;

        revisions.push(Revision {
            hash: oid.to_string(),
            timestamp: DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_else(Utc::now),
            author: commit.author().name().unwrap_or("unknown").to_string(),
            operation,
            format,
            value: blob.content().to_vec(),
        });
    }
    Ok(revisions)
}

fn get_revision_blocking(repo: &Mutex<Repository>, key: &str, rev: &str) -> StashResult<(Vec<u8>, Format)> {
    let repo = repo.lock().expect("git repository mutex poisoned");
    let rel_path = key_to_path(key);

    let object = repo.revparse_single(rev).map_err(|_| StashError::NotFound)?;
    let commit = object.peel_to_commit().map_err(|_| StashError::NotFound)?;
    let tree = commit.tree().map_err(git_err)?;
    let entry = tree.get_path(&rel_path).map_err(|_| StashError::NotFound)?;
    let blob = repo.find_blob(entry.id()).map_err(git_err)?;

    let format = parse_commit_message(commit.message().unwrap_or(""))
        .map(|(_, f)| f)
        .unwrap_or_default();
    Ok((blob.content().to_vec(), format))
}

#[async_trait]
impl GitCollaborator for Git2Collaborator {
    async fn commit(&self, request: CommitRequest) -> StashResult<()> {
        let repo = self.repo.clone();
        let message = commit_message(request.operation, &request.key, request.format);
        tokio::task::spawn_blocking(move || {
            commit_blocking(&repo, &request.key, &request.value, message, &request.author)
        })
        .await
        .map_err(|e| StashError::Internal(format!("git task join: {e}")))?
    }

    async fn delete(&self, key: &str, author: &str) -> StashResult<()> {
        let repo = self.repo.clone();
        let key = key.to_string();
        let author = author.to_string();
        tokio::task::spawn_blocking(move || delete_blocking(&repo, &key, &author))
            .await
            .map_err(|e| StashError::Internal(format!("git task join: {e}")))?
    }

    async fn history(&self, key: &str, limit: usize) -> StashResult<Vec<Revision>> {
        let repo = self.repo.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || history_blocking(&repo, &key, limit))
            .await
            .map_err(|e| StashError::Internal(format!("git task join: {e}")))?
    }

    async fn get_revision(&self, key: &str, rev: &str) -> StashResult<(Vec<u8>, Format)> {
        let repo = self.repo.clone();
        let key = key.to_string();
        let rev = rev.to_string();
        tokio::task::spawn_blocking(move || get_revision_blocking(&repo, &key, &rev))
            .await
            .map_err(|e| StashError::Internal(format!("git task join: {e}")))?
    }
}

/// Restore orchestration: fetch the value as of `rev`, write it through
/// the engine (applying secret-path encryption like any other write),
/// then log and re-commit with `operation=restore`.
/// The re-commit is best-effort; its failure is logged but never
/// propagated, matching every other post-mutation git call.
pub async fn restore(
    collaborator: &dyn GitCollaborator,
    engine: &Engine,
    key: &str,
    rev: &str,
    author: &str,
) -> StashResult<()> {
    let (value, format) = collaborator.get_revision(key, rev).await?;
    engine.set(key, value.clone(), format.as_str()).await?;

    if let Err(err) = collaborator
        .commit(CommitRequest {
            key: key.to_string(),
            value,
            operation: Operation::Restore,
            format,
            author: author.to_string(),
        })
        .await
    {
        warn!(key, error = %err, "git commit after restore failed");
    }
    Ok(())
}
