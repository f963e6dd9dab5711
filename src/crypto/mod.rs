//! AES-256-GCM encryption for secure-write backups.
//!
//! Backups are sealed with a symmetric key dedicated to that purpose: by
//! default the fixed key baked into the build, or a key derived from a
//! caller-supplied passphrase via Argon2id.
//!
//! Sealed payload layout: [ nonce (12 B) | ciphertext | GCM tag (16 B) ]

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;

/// Byte length of the AES-GCM nonce prepended to every sealed payload.
pub const NONCE_LEN: usize = 12;

/// The fixed key used for secure-write backups.  Backups are an internal
/// crash-recovery mechanism, not a confidentiality boundary; the fixed key
/// keeps restoration possible without any external key material.
const BACKUP_KEY: [u8; 32] = [
    0x4e, 0x69, 0x58, 0x37, 0x4a, 0x37, 0x44, 0x4b,
    0x36, 0x37, 0x64, 0x34, 0x6b, 0x6b, 0x4e, 0x6c,
    0x36, 0x4e, 0x41, 0x7a, 0x34, 0x6f, 0x46, 0x58,
    0x39, 0x67, 0x4f, 0x64, 0x47, 0x5a, 0x35, 0x30,
];

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed — wrong key or corrupted data")]
    DecryptionFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("Sealed payload too short (minimum {NONCE_LEN} bytes)")]
    TooShort,
}

/// A symmetric cipher bound to one 32-byte key.
#[derive(Clone)]
pub struct BackupCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for BackupCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("BackupCipher").finish_non_exhaustive()
    }
}

impl BackupCipher {
    /// The cipher every secure-write backup uses by default.
    pub fn fixed() -> Self {
        Self { key: BACKUP_KEY }
    }

    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive a 256-bit key from a passphrase and salt using Argon2id
    /// (64 MiB, t=3, p=1).
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        let params = Params::new(64 * 1024, 3, 1, Some(32))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = [0u8; 32];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Self { key })
    }

    /// Encrypt `plaintext` with a random nonce.
    ///
    /// Returns `nonce (12 B) || ciphertext || GCM-tag (16 B)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a payload produced by [`BackupCipher::seal`].
    ///
    /// Input must start with the 12-byte nonce followed by ciphertext + tag.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::TooShort);
        }
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let nonce = aes_gcm::Nonce::from_slice(&data[..NONCE_LEN]);
        cipher
            .decrypt(nonce, &data[NONCE_LEN..])
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
