//! Key sourcing and authenticated encryption (ChaCha20-Poly1305).
//!
//! RULE: Key material never touches disk in plaintext. Password keys are
//! re-derivable from the salt stored in each file header; generated keys
//! live in memory only, or in a caller-supplied `SecretStore`.

use crate::{
    config::{EncryptionConfig, KeySource},
    error::{SaveError, SaveResult},
};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Name under which a generated key is kept in a `SecretStore`.
const STORE_KEY_NAME: &str = "idlesave.master_key";

/// Platform secure storage seam (keychain, DPAPI, ...). The engine ships no
/// implementation; embedders supply one.
pub trait SecretStore: Send + Sync {
    fn load_key(&self, name: &str) -> Option<[u8; KEY_LEN]>;
    fn store_key(&self, name: &str, key: &[u8; KEY_LEN]) -> bool;
}

pub struct KeyMaterial {
    key:      [u8; KEY_LEN],
    /// Salt the cached key was derived with. Zero for non-password keys.
    salt:     [u8; SALT_LEN],
    password: Option<(String, u32)>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("password_derived", &self.password.is_some())
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    /// Resolve the configured key source. `Ok(None)` when encryption is off.
    pub fn from_config(
        config: &EncryptionConfig,
        secrets: Option<&Arc<dyn SecretStore>>,
    ) -> SaveResult<Option<Arc<Self>>> {
        if !config.enabled {
            return Ok(None);
        }
        let material = match config.key_source {
            KeySource::None => {
                return Err(SaveError::Crypto("encryption enabled without a key source".into()))
            }
            KeySource::Password => {
                let password = config
                    .password
                    .clone()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| SaveError::Crypto("password key source without password".into()))?;
                Self::from_password(password, config.kdf_iterations)
            }
            KeySource::Generated => Self::generated(),
            KeySource::SecureStore => match secrets {
                Some(store) => Self::from_secret_store(store.as_ref()),
                None => {
                    log::warn!("secure store unavailable; falling back to an in-memory key");
                    Self::generated()
                }
            },
        };
        Ok(Some(Arc::new(material)))
    }

    pub fn from_password(password: String, iterations: u32) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(&password, &salt, iterations);
        Self { key, salt, password: Some((password, iterations)) }
    }

    pub fn generated() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key, salt: [0u8; SALT_LEN], password: None }
    }

    fn from_secret_store(store: &dyn SecretStore) -> Self {
        if let Some(key) = store.load_key(STORE_KEY_NAME) {
            return Self { key, salt: [0u8; SALT_LEN], password: None };
        }
        let material = Self::generated();
        if !store.store_key(STORE_KEY_NAME, &material.key) {
            log::warn!("secure store rejected the generated key; saves will not survive a restart");
        }
        material
    }

    pub fn salt(&self) -> [u8; SALT_LEN] {
        self.salt
    }

    fn key_for_salt(&self, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
        match &self.password {
            Some((password, iterations)) if salt != &self.salt => {
                derive_key(password, salt, *iterations)
            }
            _ => self.key,
        }
    }

    /// Encrypt `plaintext`, binding `aad` (the file header) into the tag.
    /// Returns (nonce, ciphertext ‖ tag).
    pub fn seal(&self, aad: &[u8], plaintext: &[u8]) -> SaveResult<([u8; NONCE_LEN], Vec<u8>)> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| SaveError::Crypto("encryption failed".into()))?;
        Ok((nonce, ciphertext))
    }

    /// Decrypt and authenticate. Any tampering with header, nonce,
    /// ciphertext or tag fails here.
    pub fn open(
        &self,
        salt: &[u8; SALT_LEN],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> SaveResult<Vec<u8>> {
        let key = self.key_for_salt(salt);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| SaveError::Crypto("authentication failed (wrong key or tampered data)".into()))
    }
}

fn derive_key(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}
