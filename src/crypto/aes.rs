use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use aes_gcm::aead::rand_core::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AuthError, Result};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Associated-data tag domain-separating every encrypted payload.
///
/// A ciphertext produced under one tag can never be opened under
/// another, so a wrapped offline key can't be replayed as a session
/// blob or vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionTag {
    /// The persisted session envelope's encrypted remainder.
    SessionBlob,
    /// The offline verifier payload.
    Offline,
    /// The offline key material wrapped under a biometrics key.
    BiometricOfflineKd,
}

impl EncryptionTag {
    /// The associated data bytes for this tag.
    pub fn aad(self) -> &'static [u8] {
        match self {
            EncryptionTag::SessionBlob => b"sessionlock.blob",
            EncryptionTag::Offline => b"sessionlock.offline",
            EncryptionTag::BiometricOfflineKd => b"sessionlock.biometric_offline_kd",
        }
    }
}

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Creates a new `SecureKey` from a byte array.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Creates a `SecureKey` from a byte slice, validating its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| AuthError::Encryption("Invalid key size".to_string()))?;
        Ok(Self(key))
    }

    /// Returns a reference to the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Generates a new random AES-256 key.
pub fn generate_key() -> SecureKey {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    SecureKey::new(key)
}

/// Generates a new random AES-GCM nonce.
fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts a plaintext using AES-256-GCM under a domain tag.
///
/// # Returns
///
/// `nonce || ciphertext`, with the 12-byte nonce prepended.
pub fn encrypt(key: &SecureKey, tag: EncryptionTag, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: tag.aad(),
            },
        )
        .map_err(|e| AuthError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a `nonce || ciphertext` payload using AES-256-GCM.
///
/// Fails if the payload was produced under a different domain tag.
pub fn decrypt(key: &SecureKey, tag: EncryptionTag, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() <= NONCE_SIZE {
        return Err(AuthError::Encryption("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let nonce_arr: [u8; NONCE_SIZE] = nonce_bytes
        .try_into()
        .map_err(|_| AuthError::Encryption("Invalid nonce size".to_string()))?;
    let nonce = Nonce::from(nonce_arr);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(
            &nonce,
            Payload {
                msg: ciphertext,
                aad: tag.aad(),
            },
        )
        .map_err(|e| AuthError::Encryption(format!("Decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = generate_key();
        let encrypted = encrypt(&key, EncryptionTag::Offline, b"payload").unwrap();
        let decrypted = decrypt(&key, EncryptionTag::Offline, &encrypted).unwrap();
        assert_eq!(decrypted, b"payload");
    }

    #[test]
    fn tags_are_domain_separated() {
        let key = generate_key();
        let encrypted = encrypt(&key, EncryptionTag::Offline, b"payload").unwrap();
        assert!(decrypt(&key, EncryptionTag::SessionBlob, &encrypted).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let encrypted = encrypt(&generate_key(), EncryptionTag::Offline, b"payload").unwrap();
        assert!(decrypt(&generate_key(), EncryptionTag::Offline, &encrypted).is_err());
    }

    #[test]
    fn truncated_payload_fails() {
        let key = generate_key();
        assert!(decrypt(&key, EncryptionTag::Offline, &[0u8; 8]).is_err());
    }
}
