//! Process-wide read-write guarding for the local (single-writer) backend.
//!
//! The networked backend relies on the database's own concurrency control,
//! so it is handed a lock that never actually blocks (`EngineLock::networked`).

use tokio::sync::RwLock;

/// A lock whose semantics depend on backend kind: a real reader/writer lock
/// for the local embedded database, or a no-op for the networked one.
pub struct EngineLock(Option<RwLock<()>>);

impl EngineLock {
    /// A real lock, for the local single-writer backend.
    pub fn local() -> Self {
        Self(Some(RwLock::new(())))
    }

    /// A no-op lock, for the networked backend.
    pub fn networked() -> Self {
        Self(None)
    }

    pub async fn read(&self) -> LockGuard<'_> {
        match &self.0 {
            Some(lock) => LockGuard::Read(lock.read().await),
            None => LockGuard::None,
        }
    }

    pub async fn write(&self) -> LockGuard<'_> {
        match &self.0 {
            Some(lock) => LockGuard::Write(lock.write().await),
            None => LockGuard::None,
        }
    }
}

/// A held guard from [`EngineLock`]. Dropping it releases the lock, if any.
pub enum LockGuard<'a> {
    Read(tokio::sync::RwLockReadGuard<'a, ()>),
    Write(tokio::sync::RwLockWriteGuard<'a, ()>),
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn networked_lock_never_blocks() {
        let lock = EngineLock::networked();
        let _a = lock.write().await;
        let _b = lock.write().await;
    }

    #[tokio::test]
    async fn local_lock_allows_concurrent_reads() {
        let lock = EngineLock::local();
        let _a = lock.read().await;
        let _b = lock.read().await;
    }
}
