//! UserId encryption collaborator
//!
//! Encrypts the client-supplied user identifier into the opaque string other
//! peers see. The contract is deliberately narrow: deterministic per
//! passphrase (`encrypt` of the same text under the same key always yields
//! the same ciphertext, so a userId stays stable across reconnects) and
//! round-trippable via `decrypt`.
//!
//! Key material is derived from the passphrase with SHA-256 (separately
//! domain-separated for key and nonce) and cached per passphrase for the
//! lifetime of the instance. Without a passphrase userIds pass through
//! unencrypted and a single warning is emitted.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::error::HubError;

#[derive(Clone)]
struct CipherMaterial {
    key: [u8; 32],
    nonce: [u8; 12],
}

/// Symmetric userId encryption with a per-passphrase derivation cache
pub struct Crypting {
    passphrase: Option<String>,
    cache: Mutex<HashMap<String, CipherMaterial>>,
    missing_key_notified: AtomicBool,
}

impl Crypting {
    /// An empty passphrase counts as absent: encryption is disabled and
    /// text passes through unchanged.
    pub fn new(passphrase: Option<String>) -> Self {
        Self {
            passphrase: passphrase.filter(|p| !p.is_empty()),
            cache: Mutex::new(HashMap::new()),
            missing_key_notified: AtomicBool::new(false),
        }
    }

    pub fn enabled(&self) -> bool {
        self.passphrase.is_some()
    }

    pub fn encrypt(&self, text: &str) -> Result<String, HubError> {
        let Some(passphrase) = self.passphrase.as_deref() else {
            if !self.missing_key_notified.swap(true, Ordering::Relaxed) {
                warn!("Hub encryption key not specified, userIds pass through unencrypted");
            }
            return Ok(text.to_string());
        };

        let material = self.material(passphrase);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&material.key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&material.nonce), text.as_bytes())
            .map_err(|e| HubError::Encryption(e.to_string()))?;
        Ok(BASE64.encode(ciphertext))
    }

    pub fn decrypt(&self, text: &str) -> Result<String, HubError> {
        let Some(passphrase) = self.passphrase.as_deref() else {
            return Ok(text.to_string());
        };

        let material = self.material(passphrase);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&material.key));
        let ciphertext = BASE64
            .decode(text)
            .map_err(|e| HubError::Encryption(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&material.nonce), ciphertext.as_ref())
            .map_err(|e| HubError::Encryption(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| HubError::Encryption(e.to_string()))
    }

    /// Derived key material, populated lazily and never invalidated
    fn material(&self, passphrase: &str) -> CipherMaterial {
        let mut cache = self.cache.lock();
        cache
            .entry(passphrase.to_string())
            .or_insert_with(|| derive_material(passphrase))
            .clone()
    }
}

fn derive_material(passphrase: &str) -> CipherMaterial {
    let mut key = [0u8; 32];
    key.copy_from_slice(&Sha256::digest(passphrase.as_bytes()));

    let mut nonce = [0u8; 12];
    let mut hasher = Sha256::new();
    hasher.update(b"nonce:");
    hasher.update(passphrase.as_bytes());
    nonce.copy_from_slice(&hasher.finalize()[..12]);

    CipherMaterial { key, nonce }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let crypting = Crypting::new(Some("hunter2".to_string()));
        let ciphertext = crypting.encrypt("alice@example.org").unwrap();
        assert_ne!(ciphertext, "alice@example.org");
        assert_eq!(crypting.decrypt(&ciphertext).unwrap(), "alice@example.org");
    }

    #[test]
    fn test_deterministic_per_key() {
        let crypting = Crypting::new(Some("hunter2".to_string()));
        let a = crypting.encrypt("alice").unwrap();
        let b = crypting.encrypt("alice").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_keys_differ() {
        let first = Crypting::new(Some("key-one".to_string()));
        let second = Crypting::new(Some("key-two".to_string()));
        assert_ne!(
            first.encrypt("alice").unwrap(),
            second.encrypt("alice").unwrap()
        );
    }

    #[test]
    fn test_missing_key_passes_through() {
        let crypting = Crypting::new(None);
        assert!(!crypting.enabled());
        assert_eq!(crypting.encrypt("alice").unwrap(), "alice");
        assert_eq!(crypting.decrypt("alice").unwrap(), "alice");
    }

    #[test]
    fn test_empty_key_counts_as_missing() {
        let crypting = Crypting::new(Some(String::new()));
        assert!(!crypting.enabled());
        assert_eq!(crypting.encrypt("alice").unwrap(), "alice");
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        let crypting = Crypting::new(Some("hunter2".to_string()));
        assert!(crypting.decrypt("not base64 at all!!!").is_err());
        assert!(crypting.decrypt(&BASE64.encode(b"tampered")).is_err());
    }
}
