//! Field-level encryption for personal data at rest and shared digest helpers.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::errors::ServiceError;

const CIPHERTEXT_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for individual column values.
///
/// Without a key the cipher passes values through unchanged, which is only
/// permitted outside production (enforced by config validation).
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Option<Aes256Gcm>,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("enabled", &self.cipher.is_some())
            .finish()
    }
}

impl FieldCipher {
    pub fn new(key: Option<&str>) -> Self {
        let cipher = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .and_then(|k| Aes256Gcm::new_from_slice(&Sha256::digest(k.as_bytes())).ok());
        Self { cipher }
    }

    pub fn passthrough() -> Self {
        Self { cipher: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, ServiceError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_string());
        };

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| ServiceError::EncryptionError("encryption failed".into()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", CIPHERTEXT_PREFIX, STANDARD.encode(payload)))
    }

    /// Values written before encryption was enabled are returned as-is.
    pub fn decrypt(&self, stored: &str) -> Result<String, ServiceError> {
        let Some(encoded) = stored.strip_prefix(CIPHERTEXT_PREFIX) else {
            return Ok(stored.to_string());
        };
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            ServiceError::EncryptionError("encrypted value found but no key configured".into())
        })?;

        let payload = STANDARD
            .decode(encoded)
            .map_err(|e| ServiceError::EncryptionError(e.to_string()))?;
        if payload.len() <= NONCE_LEN {
            return Err(ServiceError::EncryptionError("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ServiceError::EncryptionError("decryption failed".into()))?;
        String::from_utf8(plaintext).map_err(|e| ServiceError::EncryptionError(e.to_string()))
    }

    pub fn encrypt_opt(&self, value: Option<&str>) -> Result<Option<String>, ServiceError> {
        value.map(|v| self.encrypt(v)).transpose()
    }
}

/// Lowercase hex SHA-256 of the concatenated parts.
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of two byte slices.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Hex string of `len` bytes from the operating system RNG.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
