//! AES-256-GCM over whole in-memory buffers.
//!
//! The IV is 16 bytes rather than GCM's usual 12, matching the format of
//! existing backup artifacts. `aes-gcm` derives the counter block from a
//! non-96-bit IV through GHASH, as the GCM specification requires.

use crate::envelope::{Envelope, IV_LEN, TAG_LEN};
use crate::{BackupError, Result};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256-GCM with a 128-bit IV and 128-bit tag
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Key length in bytes
pub const KEY_LEN: usize = 32;

/// Pre-shared 256-bit backup key; wiped on drop and never printed
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Wrap raw key bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a 64-character hex string
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let decoded = hex::decode(encoded.trim()).map_err(|e| {
            BackupError::Config(format!("BACKUP_ENCRYPTION_KEY is not valid hex: {}", e))
        })?;
        if decoded.len() != KEY_LEN {
            return Err(BackupError::Config(format!(
                "BACKUP_ENCRYPTION_KEY must decode to {} bytes, got {}",
                KEY_LEN,
                decoded.len()
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Output of one encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Freshly drawn IV
    pub iv: [u8; IV_LEN],
    /// Ciphertext, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// GCM tag
    pub tag: [u8; TAG_LEN],
}

impl From<Sealed> for Envelope {
    fn from(sealed: Sealed) -> Self {
        Envelope::new(sealed.iv, sealed.ciphertext, sealed.tag)
    }
}

/// Authenticated encryption with a fixed key
pub struct CipherEngine {
    cipher: Aes256Gcm16,
}

impl CipherEngine {
    /// Create an engine for the given key
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm16::new(GenericArray::from_slice(key.as_bytes())),
        }
    }

    /// Encrypt under a fresh random IV
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| BackupError::Io("AES-GCM encryption failed".to_string()))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(Sealed {
            iv,
            ciphertext: buffer,
            tag: tag_bytes,
        })
    }

    /// Decrypt and verify; nothing is returned unless the tag matches
    pub fn decrypt(
        &self,
        iv: &[u8; IV_LEN],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>> {
        let mut buffer = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| BackupError::AuthenticationFailure)?;
        Ok(buffer)
    }

    /// Encrypt and frame in one step
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let sealed = self.encrypt(plaintext)?;
        Ok(Envelope::from(sealed).to_bytes())
    }

    /// Decrypt a parsed envelope
    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.decrypt(&envelope.iv, &envelope.ciphertext, &envelope.tag)
    }
}

impl fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_key_from_hex() {
        let key = EncryptionKey::from_hex(KEY_HEX).unwrap();
        assert_eq!(key.as_bytes()[31], 0x1f);

        assert!(matches!(
            EncryptionKey::from_hex("abcd"),
            Err(BackupError::Config(_))
        ));
        assert!(matches!(
            EncryptionKey::from_hex(&"zz".repeat(32)),
            Err(BackupError::Config(_))
        ));
    }

    #[test]
    fn test_key_debug_redacted() {
        let key = EncryptionKey::from_hex(KEY_HEX).unwrap();
        let printed = format!("{:?}", key);
        assert!(!printed.contains("0001"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_ciphertext_length_matches_plaintext() {
        let engine = CipherEngine::new(&EncryptionKey::from_hex(KEY_HEX).unwrap());
        for len in [0usize, 1, 15, 16, 17, 1000] {
            let sealed = engine.encrypt(&vec![0x5a; len]).unwrap();
            assert_eq!(sealed.ciphertext.len(), len);
        }
    }
}
