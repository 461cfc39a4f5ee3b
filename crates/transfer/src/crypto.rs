//! Per-chunk payload encryption.
//!
//! Each chunk is sealed with AES-256-GCM under the destination's key and a
//! fresh random nonce. Output layout: `nonce (12) || ciphertext || tag (16)`.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use sha2::{Digest, Sha256};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Errors produced while sealing or opening a chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncryptionError {
    #[error("no key material for destination")]
    MissingKey,

    #[error("key material must be {KEY_LEN} bytes, got {0}")]
    MalformedKey(usize),

    #[error("invalid hex key: {0}")]
    InvalidHex(String),

    #[error("failed to seal chunk")]
    SealFailed,

    #[error("failed to open chunk (wrong key or tampered data)")]
    OpenFailed,

    #[error("sealed payload too short: {0} bytes")]
    Truncated(usize),
}

/// Symmetric key derived for one destination storage instance.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Wraps raw key bytes. Length is checked when the key is used.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parses a hex-encoded key.
    pub fn from_hex(s: &str) -> Result<Self, EncryptionError> {
        let bytes = hex::decode(s.trim()).map_err(|e| EncryptionError::InvalidHex(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Derives a key from a shared secret and a context string
    /// (e.g. the destination identity) with SHA-256.
    pub fn derive(secret: &[u8], context: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"vaultup-chunk-key-v1\0");
        hasher.update(context.as_bytes());
        hasher.update(b"\0");
        hasher.update(secret);
        Self(hasher.finalize().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that the key is present and of the right length.
    pub fn validate(&self) -> Result<(), EncryptionError> {
        self.cipher().map(|_| ())
    }

    fn cipher(&self) -> Result<Aes256Gcm, EncryptionError> {
        match self.0.len() {
            0 => Err(EncryptionError::MissingKey),
            KEY_LEN => Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))),
            n => Err(EncryptionError::MalformedKey(n)),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({} bytes, redacted)", self.0.len())
    }
}

/// Seals `plaintext` under `key` with a freshly generated nonce.
pub fn encrypt_chunk(plaintext: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, EncryptionError> {
    let cipher = key.cipher()?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| EncryptionError::SealFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Opens a payload produced by [`encrypt_chunk`].
pub fn decrypt_chunk(sealed: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, EncryptionError> {
    let cipher = key.cipher()?;
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(EncryptionError::Truncated(sealed.len()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EncryptionError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> KeyMaterial {
        KeyMaterial::derive(b"secret", "dest-1")
    }

    #[test]
    fn sealed_layout_and_open() {
        let sealed = encrypt_chunk(b"hello chunk", &key()).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 11 + TAG_LEN);
        assert_eq!(decrypt_chunk(&sealed, &key()).unwrap(), b"hello chunk");
    }

    #[test]
    fn nonce_differs_per_chunk() {
        let a = encrypt_chunk(b"same bytes", &key()).unwrap();
        let b = encrypt_chunk(b"same bytes", &key()).unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn missing_key_is_rejected() {
        let empty = KeyMaterial::from_bytes(Vec::new());
        assert_eq!(
            encrypt_chunk(b"x", &empty).unwrap_err(),
            EncryptionError::MissingKey
        );
    }

    #[test]
    fn malformed_key_is_rejected() {
        let short = KeyMaterial::from_bytes(vec![1u8; 16]);
        assert_eq!(
            encrypt_chunk(b"x", &short).unwrap_err(),
            EncryptionError::MalformedKey(16)
        );
    }

    #[test]
    fn validate_checks_length() {
        assert!(key().validate().is_ok());
        assert_eq!(
            KeyMaterial::from_bytes(vec![0u8; 31]).validate(),
            Err(EncryptionError::MalformedKey(31))
        );
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = encrypt_chunk(b"payload", &key()).unwrap();
        let other = KeyMaterial::derive(b"secret", "dest-2");
        assert_eq!(
            decrypt_chunk(&sealed, &other).unwrap_err(),
            EncryptionError::OpenFailed
        );
    }

    #[test]
    fn truncated_payload() {
        assert_eq!(
            decrypt_chunk(&[0u8; 5], &key()).unwrap_err(),
            EncryptionError::Truncated(5)
        );
    }

    #[test]
    fn derive_is_deterministic_and_context_bound() {
        assert_eq!(key(), KeyMaterial::derive(b"secret", "dest-1"));
        assert_ne!(key(), KeyMaterial::derive(b"secret", "dest-2"));
        assert_eq!(key().as_bytes().len(), KEY_LEN);
    }

    #[test]
    fn hex_keys() {
        let k = KeyMaterial::from_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(k.as_bytes().len(), 32);
        assert!(matches!(
            KeyMaterial::from_hex("zz"),
            Err(EncryptionError::InvalidHex(_))
        ));
    }

    #[test]
    fn debug_redacts_key() {
        let s = format!("{:?}", key());
        assert_eq!(s, "KeyMaterial(32 bytes, redacted)");
    }
}
