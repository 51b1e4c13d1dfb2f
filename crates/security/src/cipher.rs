//! AES-256-GCM sealing of individual field values.
//!
//! Format: `base64(nonce_12bytes || ciphertext || tag_16bytes)`. Each value
//! carries its own nonce and tag, so nothing but the key is needed to open it.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use zeroize::Zeroize;

use crate::error::{Result, SecurityError};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub(crate) const KEY_LEN: usize = 32;

/// A 256-bit field encryption key.
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; KEY_LEN],
}

impl Drop for FieldCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Parses base64 key material (standard or URL-safe alphabet, padded or not).
    pub fn from_base64(material: &str) -> Result<Self> {
        let material = material.trim();
        let mut bytes = [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(material).ok())
            .ok_or_else(|| SecurityError::InvalidKey("not valid base64".to_string()))?;

        if bytes.len() != KEY_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(SecurityError::InvalidKey(format!(
                "wrong length: {len} bytes (expected {KEY_LEN})"
            )));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { key })
    }

    /// Encrypt plaintext → base64(nonce || ciphertext || tag)
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| SecurityError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(&sealed))
    }

    /// Decrypt base64(nonce || ciphertext || tag) → plaintext
    pub fn decrypt(&self, sealed_b64: &str) -> Result<Vec<u8>> {
        let data = STANDARD
            .decode(sealed_b64)
            .map_err(|_| SecurityError::Decryption("invalid base64"))?;

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(SecurityError::Decryption("ciphertext too short"));
        }

        let cipher = self.cipher()?;
        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
        cipher
            .decrypt(nonce, &data[NONCE_LEN..])
            .map_err(|_| SecurityError::Decryption("wrong key or tampered data"))
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, sealed_b64: &str) -> Result<String> {
        let bytes = self.decrypt(sealed_b64)?;
        String::from_utf8(bytes).map_err(|_| SecurityError::Decryption("plaintext is not UTF-8"))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| SecurityError::InvalidKey("rejected by cipher".to_string()))
    }
}
