//! AES-256-GCM sealing of the credential cache.
//!
//! The whole cache blob is encrypted as one unit with a fresh nonce per save
//! and stored as a small JSON envelope:
//!
//! ```text
//! {"v":1,"nonce":"<base64>","ciphertext":"<base64>"}
//! ```
//!
//! The key is 32 bytes, supplied base64-encoded through `TOKEN_CACHE_KEY`.

use crate::storage::StorageError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

const ENVELOPE_VERSION: u8 = 1;

/// Decodes a base64 key and checks it is exactly 32 bytes.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Encrypts `plaintext` with a random nonce. Returns `(nonce, ciphertext)`.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    // Never reuse a nonce with the same key
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok((nonce.to_vec(), ciphertext))
}

/// Decrypts and authenticates `ciphertext`.
pub fn decrypt(nonce: &[u8], ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce.len()
        ));
    }

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u8,
    nonce: String,
    ciphertext: String,
}

/// Seals and opens credential cache contents with a fixed key.
#[derive(Clone)]
pub struct CacheCipher {
    key: Vec<u8>,
}

impl CacheCipher {
    pub fn from_base64(key_base64: &str) -> Result<Self, StorageError> {
        let key = validate_key(key_base64).map_err(|e| StorageError::Crypto(format!("{:#}", e)))?;
        Ok(Self { key })
    }

    /// Encrypts `plaintext` into a JSON envelope.
    pub fn seal(&self, plaintext: &str) -> Result<String, StorageError> {
        let (nonce, ciphertext) = encrypt(plaintext.as_bytes(), &self.key)
            .map_err(|e| StorageError::Crypto(format!("{:#}", e)))?;

        let envelope = Envelope {
            v: ENVELOPE_VERSION,
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        };
        serde_json::to_string(&envelope).map_err(|e| StorageError::Crypto(e.to_string()))
    }

    /// Opens an envelope produced by [`CacheCipher::seal`].
    pub fn open(&self, sealed: &str) -> Result<String, StorageError> {
        self.open_inner(sealed)
            .map_err(|e| StorageError::Crypto(format!("{:#}", e)))
    }

    fn open_inner(&self, sealed: &str) -> Result<String> {
        let envelope: Envelope =
            serde_json::from_str(sealed).context("Content is not an encrypted cache envelope")?;
        if envelope.v != ENVELOPE_VERSION {
            return Err(anyhow!("Unsupported envelope version {}", envelope.v));
        }

        let nonce = BASE64.decode(&envelope.nonce).context("Failed to decode nonce")?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .context("Failed to decode ciphertext")?;

        let plaintext = decrypt(&nonce, &ciphertext, &self.key)?;
        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }
}

impl std::fmt::Debug for CacheCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CacheCipher(..)")
    }
}
