//! Server-side symmetric encryption for secret-path values.
//!
//! Per-value format: `base64(salt(16) || nonce(24) || ciphertext || tag(16))`
//! using XChaCha20-Poly1305 (192-bit nonce, 128-bit tag) with a key
//! derived from the master key and a per-encryption salt via Argon2id.

use crate::error::{StashError, StashResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 4;

/// A server-side master key used to encrypt/decrypt secret-path values.
///
/// Must be at least 16 bytes.
#[derive(Clone)]
pub struct MasterKey {
    bytes: Vec<u8>,
}

impl MasterKey {
    /// Construct a master key, rejecting anything shorter than 16 bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> StashResult<Self> {
        let bytes = bytes.into();
        if bytes.len() < 16 {
            return Err(StashError::Internal(
                "master key must be at least 16 bytes".into(),
            ));
        }
        Ok(Self { bytes })
    }

    fn derive(&self, salt: &[u8]) -> StashResult<[u8; KEY_LEN]> {
        use argon2::{Algorithm, Argon2, Params, Version};

        let params = Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(KEY_LEN),
        )
        .map_err(|e| StashError::Internal(format!("argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut out = [0u8; KEY_LEN];
        argon2
            .hash_password_into(&self.bytes, salt, &mut out)
            .map_err(|e| StashError::Internal(format!("argon2 derivation: {e}")))?;
        Ok(out)
    }

    /// Encrypt `plaintext`, returning the base64-encoded envelope
    /// `salt || nonce || ciphertext || tag`. Every call uses a fresh
    /// random salt and nonce, so repeated calls on the same plaintext
    /// never produce the same ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> StashResult<String> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = self.derive(&salt)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| StashError::Internal(format!("cipher init: {e}")))?;
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| StashError::Internal("encryption failed".into()))?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a base64 envelope produced by [`Self::encrypt`]. Returns
    /// an empty byte sequence (not an error) for an originally-empty
    /// plaintext.
    pub fn decrypt(&self, envelope: &str) -> StashResult<Vec<u8>> {
        let blob = BASE64
            .decode(envelope)
            .map_err(|_| StashError::DecryptionFailed)?;
        if blob.len() < SALT_LEN + NONCE_LEN {
            return Err(StashError::DecryptionFailed);
        }
        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive(salt)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| StashError::DecryptionFailed)?;
        let nonce = XNonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StashError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MasterKey {
        MasterKey::new(b"a-master-key-over-16-bytes".to_vec()).unwrap()
    }

    #[test]
    fn round_trip() {
        let k = key();
        let envelope = k.encrypt(b"hunter2").unwrap();
        assert_ne!(envelope.as_bytes(), b"hunter2");
        assert_eq!(k.decrypt(&envelope).unwrap(), b"hunter2");
    }

    #[test]
    fn empty_plaintext_round_trips_to_empty() {
        let k = key();
        let envelope = k.encrypt(b"").unwrap();
        assert_eq!(k.decrypt(&envelope).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn two_encryptions_of_same_plaintext_differ() {
        let k = key();
        let a = k.encrypt(b"same").unwrap();
        let b = k.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let k1 = key();
        let k2 = MasterKey::new(b"a-different-master-key-16b".to_vec()).unwrap();
        let envelope = k1.encrypt(b"secret").unwrap();
        assert!(k2.decrypt(&envelope).is_err());
    }

    #[test]
    fn corrupted_envelope_fails_to_decrypt() {
        let k = key();
        let mut envelope = k.encrypt(b"secret").unwrap();
        envelope.push('A');
        assert!(k.decrypt(&envelope).is_err());
    }

    #[test]
    fn master_key_rejects_short_keys() {
        assert!(MasterKey::new(b"short".to_vec()).is_err());
    }
}
