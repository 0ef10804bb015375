//! Cookie encryption.
//!
//! AES-256-GCM with a per-cookie key derived by HMAC-SHA256 from the master key
//! and a random token. The cookie name is bound as associated data, so a value
//! lifted from one cookie does not decrypt under another.

use crate::config::{GatewayError, Result};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct CookieCrypto {
    master_key: [u8; 32],
}

impl CookieCrypto {
    /// Creates a new `CookieCrypto` instance using the provided secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut master_key = [0u8; 32];
        master_key.copy_from_slice(&digest);
        Self { master_key }
    }

    /// Encrypts `plaintext` bound to `aad` into a URL-safe string.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Crypto` if key derivation or AES-GCM sealing fails.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<String> {
        let mut token = [0u8; TOKEN_LEN];
        OsRng.fill_bytes(&mut token);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.derive_key(&token)?));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| GatewayError::Crypto("AES-GCM encryption failed".into()))?;

        let mut combined = Vec::with_capacity(TOKEN_LEN + NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&token);
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Decrypts a value produced by [`Self::encrypt`] with the same `aad`.
    ///
    /// Any decoding, length or authentication failure yields `None`.
    #[must_use]
    pub fn decrypt(&self, encoded: &str, aad: &[u8]) -> Option<Vec<u8>> {
        let combined = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        if combined.len() < TOKEN_LEN + NONCE_LEN + TAG_LEN + 1 {
            return None;
        }

        let (token, rest) = combined.split_at(TOKEN_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.derive_key(token).ok()?));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .ok()
    }

    fn derive_key(&self, token: &[u8]) -> Result<[u8; 32]> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.master_key)
            .map_err(|e| GatewayError::Crypto(e.to_string()))?;
        mac.update(token);
        let mut key = [0u8; 32];
        key.copy_from_slice(&mac.finalize().into_bytes());
        Ok(key)
    }
}
