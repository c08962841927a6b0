//! The crypto-aware storage facade: composes a [`StorageEngine`] backend
//! with an optional [`MasterKey`] to implement the `Get`/`Set`/`Delete`/
//! `List` contract exactly as the storage and crypto sections describe it.
//! Everything HTTP-shaped (`stash-server`) talks to this, never to a
//! backend directly.

use crate::crypto::MasterKey;
use crate::crypto::zk;
use crate::error::{StashError, StashResult};
use crate::format::Format;
use crate::key;
use crate::storage::{SetVersionOutcome, StorageEngine};
use crate::types::{EntryMetadata, ListFilter};
use chrono::{DateTime, Utc};
use std::sync::Arc;

fn zero_version() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is a valid timestamp")
}

/// The top-level KV engine: normalizes keys, applies the secret-path
/// encryption rule, and delegates persistence to a [`StorageEngine`].
pub struct Engine {
    storage: Arc<dyn StorageEngine>,
    master_key: Option<MasterKey>,
}

impl Engine {
    pub fn new(storage: Arc<dyn StorageEngine>, master_key: Option<MasterKey>) -> Self {
        Self {
            storage,
            master_key,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    pub async fn get(&self, raw_key: &str) -> StashResult<Vec<u8>> {
        self.get_with_format(raw_key).await.map(|(v, _)| v)
    }

    pub async fn get_with_format(&self, raw_key: &str) -> StashResult<(Vec<u8>, Format)> {
        let k = key::normalize(raw_key);
        let entry = self.storage.get_raw(k).await?;
        let value = self.decrypt_if_needed(k, entry.value)?;
        Ok((value, entry.format))
    }

    pub async fn get_info(&self, raw_key: &str) -> StashResult<EntryMetadata> {
        let k = key::normalize(raw_key);
        let entry = self.storage.get_raw(k).await?;
        Ok(EntryMetadata {
            key: k.to_string(),
            size: entry.value.len() as u64,
            format: entry.format,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            secret: key::is_secret(k),
            zk_encrypted: zk::is_zk_envelope(&entry.value),
        })
    }

    pub async fn set(&self, raw_key: &str, value: Vec<u8>, format_raw: &str) -> StashResult<bool> {
        let k = key::normalize(raw_key);
        let format = Format::parse_or_default(format_raw);
        let stored = self.prepare_for_storage(k, value)?;
        self.storage.set_raw(k, stored, format).await
    }

    pub async fn set_with_version(
        &self,
        raw_key: &str,
        value: Vec<u8>,
        format_raw: &str,
        expected_updated_at: DateTime<Utc>,
    ) -> StashResult<()> {
        let k = key::normalize(raw_key);
        let format = Format::parse_or_default(format_raw);
        let stored = self.prepare_for_storage(k, value)?;

        if expected_updated_at == zero_version() {
            self.storage.set_raw(k, stored, format).await?;
            return Ok(());
        }

        match self
            .storage
            .set_raw_with_version(k, stored, format, expected_updated_at)
            .await?
        {
            SetVersionOutcome::Applied => Ok(()),
            SetVersionOutcome::Conflict(entry) => {
                let plaintext = self.decrypt_if_needed(k, entry.value)?;
                Err(StashError::conflict(
                    plaintext,
                    entry.format.as_str().to_string(),
                    entry.updated_at,
                ))
            }
        }
    }

    pub async fn delete(&self, raw_key: &str) -> StashResult<()> {
        let k = key::normalize(raw_key);
        self.storage.delete(k).await
    }

    pub async fn list(&self, filter: ListFilter) -> StashResult<Vec<EntryMetadata>> {
        let entries = self.storage.list_raw(filter).await?;
        Ok(entries
            .into_iter()
            .map(|e| EntryMetadata {
                secret: key::is_secret(&e.key),
                zk_encrypted: zk::is_zk_envelope(&e.value),
                key: e.key,
                size: e.value.len() as u64,
                format: e.format,
                created_at: e.created_at,
                updated_at: e.updated_at,
            })
            .collect())
    }

    /// Apply the secret-path encryption rule to a value about to be stored.
    fn prepare_for_storage(&self, k: &str, value: Vec<u8>) -> StashResult<Vec<u8>> {
        if !key::is_secret(k) {
            return Ok(value);
        }
        if zk::is_zk_envelope(&value) {
            if !zk::validate_zk_envelope(&value) {
                return Err(StashError::InvalidZkPayload);
            }
            return Ok(value);
        }
        let master_key = self
            .master_key
            .as_ref()
            .ok_or(StashError::SecretsNotConfigured)?;
        Ok(master_key.encrypt(&value)?.into_bytes())
    }

    /// Undo the secret-path encryption rule on a value just read back.
    fn decrypt_if_needed(&self, k: &str, stored: Vec<u8>) -> StashResult<Vec<u8>> {
        if !key::is_secret(k) || zk::is_zk_envelope(&stored) {
            return Ok(stored);
        }
        let master_key = self
            .master_key
            .as_ref()
            .ok_or(StashError::SecretsNotConfigured)?;
        let envelope = String::from_utf8(stored).map_err(|_| StashError::DecryptionFailed)?;
        master_key.decrypt(&envelope)
    }
}
