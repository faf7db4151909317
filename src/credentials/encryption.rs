//! AES-256-GCM sealing of token secrets at rest.
//!
//! Each secret is sealed separately with its own random nonce. The 32-byte
//! master key is supplied base64-encoded from the environment.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the master key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;

/// Seals and opens token secrets with a fixed master key.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

/// Ciphertext and nonce, both base64-encoded for storage in TEXT columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

impl TokenCipher {
    /// Builds a cipher from a base64-encoded 32-byte key.
    ///
    /// # Errors
    /// Fails if the key is not valid base64 or does not decode to 32 bytes.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
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

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<Sealed> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(Sealed {
            ciphertext: BASE64.encode(&ciphertext),
            nonce: BASE64.encode(nonce),
        })
    }

    /// Decrypts a value produced by [`TokenCipher::seal`].
    ///
    /// # Errors
    /// Fails on a wrong key, a mismatched nonce, or tampered ciphertext.
    pub fn open(&self, ciphertext: &str, nonce: &str) -> Result<String> {
        let ciphertext = BASE64
            .decode(ciphertext)
            .context("Failed to decode ciphertext")?;
        let nonce = BASE64.decode(nonce).context("Failed to decode nonce")?;

        if nonce.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce.len()
            ));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted token is not valid UTF-8")
    }
}
