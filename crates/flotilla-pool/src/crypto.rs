//! AEAD encryption for credentials at rest.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use crate::error::{PoolError, PoolResult};

const NONCE_LEN: usize = 24;

/// Encrypts and decrypts credential strings with XChaCha20-Poly1305.
///
/// Stored form is base64 of `nonce || ciphertext`; the 32-byte key comes
/// from process config and never leaves memory.
#[derive(Clone)]
pub struct Crypter {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for Crypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crypter").finish_non_exhaustive()
    }
}

impl Crypter {
    /// Build a crypter from 32 bytes of key material.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Encrypt a plaintext credential for storage.
    ///
    /// # Errors
    ///
    /// Returns an error when the cipher rejects the payload.
    pub fn encrypt(&self, plaintext: &str) -> PoolResult<String> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| PoolError::Credentials {
                detail: "encryption failed".to_string(),
            })?;
        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypt a stored credential.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed input or a key mismatch.
    pub fn decrypt(&self, encoded: &str) -> PoolResult<String> {
        let combined = BASE64.decode(encoded).map_err(|_| PoolError::Credentials {
            detail: "stored credential is not valid base64".to_string(),
        })?;
        if combined.len() <= NONCE_LEN {
            return Err(PoolError::Credentials {
                detail: "stored credential is truncated".to_string(),
            });
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| PoolError::Credentials {
                detail: "credential decryption failed; key mismatch or corrupt record"
                    .to_string(),
            })?;
        String::from_utf8(plaintext).map_err(|_| PoolError::Credentials {
            detail: "decrypted credential is not valid UTF-8".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypter() -> Crypter {
        Crypter::new(&[7u8; 32])
    }

    #[test]
    fn round_trips_plaintext() {
        let encoded = crypter().encrypt("hunter2").expect("encrypt");
        assert_eq!(crypter().decrypt(&encoded).expect("decrypt"), "hunter2");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let a = crypter().encrypt("same").expect("encrypt");
        let b = crypter().encrypt("same").expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let encoded = crypter().encrypt("secret").expect("encrypt");
        let other = Crypter::new(&[9u8; 32]);
        assert!(other.decrypt(&encoded).is_err());
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(crypter().decrypt("not base64 ***").is_err());
        assert!(crypter().decrypt("AAAA").is_err());
    }
}
