//! At-rest Secret Encryption
//!
//! AES-256-GCM sealing for second-factor secrets and OAuth flow state.
//! Sealed values are hex strings of `nonce(12) || ciphertext || tag(16)`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use thiserror::Error;

const NONCE_LEN: usize = 12;

/// Encryption errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid encryption key length (expected 32 bytes, got {0})")]
    InvalidKeyLength(usize),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid sealed data format")]
    InvalidFormat,

    #[error("Hex decoding failed: {0}")]
    HexError(#[from] hex::FromHexError),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Symmetric sealer holding the server-wide key.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    /// Build from a raw 32-byte key.
    pub fn new(key: &[u8]) -> CryptoResult<Self> {
        if key.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build from a hex encoded key, as stored in `MFA_ENCRYPTION_KEY`.
    pub fn from_hex(key: &str) -> CryptoResult<Self> {
        Self::new(&hex::decode(key)?)
    }

    /// Seal a UTF-8 value. A fresh nonce is drawn for every call.
    pub fn seal(&self, plaintext: &str) -> CryptoResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(hex::encode(combined))
    }

    /// Open a value produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &str) -> CryptoResult<String> {
        let combined = hex::decode(sealed)?;
        if combined.len() <= NONCE_LEN {
            return Err(CryptoError::InvalidFormat);
        }

        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidFormat)
    }
}
