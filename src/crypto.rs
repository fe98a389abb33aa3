//! System-prompt encryption at rest.
//!
//! Agent system prompts are sealed with AES-256-GCM before they ever reach
//! the database. Blobs are stored hex-encoded with the 12-byte nonce
//! prefixed to the ciphertext, so a single string column holds everything
//! needed for decryption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::{AioxError, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// AEAD cipher for agent system prompts.
///
/// Constructed once at startup from the configured 64-hex-char key and
/// shared by the agent service. Encryption output is
/// `hex(nonce || ciphertext || tag)`.
pub struct PromptCipher {
    cipher: Aes256Gcm,
}

impl PromptCipher {
    /// Build a cipher from a 64-character hex key (32 bytes).
    pub fn new(hex_key: &str) -> Result<Self> {
        let key = hex::decode(hex_key.trim())
            .map_err(|e| AioxError::Crypto(format!("decoding encryption key: {}", e)))?;
        if key.len() != KEY_LEN {
            return Err(AioxError::Crypto(format!(
                "encryption key must be {} bytes ({} hex chars), got {} bytes",
                KEY_LEN,
                KEY_LEN * 2,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AioxError::Crypto(format!("creating cipher: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Seal a plaintext string. Each call draws a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AioxError::Crypto(format!("encrypting: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    /// Open a hex-encoded, nonce-prefixed blob produced by [`encrypt`].
    ///
    /// [`encrypt`]: PromptCipher::encrypt
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let data = hex::decode(blob)
            .map_err(|e| AioxError::Crypto(format!("decoding ciphertext: {}", e)))?;
        if data.len() < NONCE_LEN {
            return Err(AioxError::Crypto("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| AioxError::Crypto(format!("decrypting: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| AioxError::Crypto(format!("decrypted bytes not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = PromptCipher::new(TEST_KEY).unwrap();
        for plaintext in ["", "hi", "You are a helpful assistant.", "ünïcödé ✓"] {
            let sealed = cipher.encrypt(plaintext).unwrap();
            assert_eq!(cipher.decrypt(&sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let cipher = PromptCipher::new(TEST_KEY).unwrap();
        let sealed = cipher.encrypt("secret prompt").unwrap();
        assert_ne!(sealed, "secret prompt");
        assert_ne!(sealed.as_bytes(), "secret prompt".as_bytes());
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let cipher = PromptCipher::new(TEST_KEY).unwrap();
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_short_key() {
        assert!(PromptCipher::new("abcd").is_err());
    }

    #[test]
    fn test_rejects_non_hex_key() {
        let key = "zz".repeat(32);
        assert!(PromptCipher::new(&key).is_err());
    }

    #[test]
    fn test_rejects_truncated_blob() {
        let cipher = PromptCipher::new(TEST_KEY).unwrap();
        assert!(cipher.decrypt("aabb").is_err());
    }

    #[test]
    fn test_rejects_tampered_blob() {
        let cipher = PromptCipher::new(TEST_KEY).unwrap();
        let sealed = cipher.encrypt("secret").unwrap();
        let mut bytes = hex::decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(cipher.decrypt(&hex::encode(bytes)).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher_a = PromptCipher::new(TEST_KEY).unwrap();
        let other_key = "ff".repeat(32);
        let cipher_b = PromptCipher::new(&other_key).unwrap();
        let sealed = cipher_a.encrypt("secret").unwrap();
        assert!(cipher_b.decrypt(&sealed).is_err());
    }
}
