use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::aes::{self, EncryptionTag, SecureKey, KEY_SIZE};
use crate::error::{AuthError, Result};

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 3;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 6;
/// The size of the derivation salt in bytes.
const SALT_SIZE: usize = 16;
/// The size of the random verifier payload in bytes.
const VERIFIER_PAYLOAD_SIZE: usize = 32;

/// The parameters needed to reproduce an offline key derivation
/// deterministically. Safe to persist in clear.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Derivation algorithm identifier.
    pub algorithm: String,
    /// Algorithm version (0x13 for current Argon2).
    pub version: u32,
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Iteration count.
    pub iterations: u32,
    /// Parallelism factor.
    pub parallelism: u32,
    /// Base64-encoded derivation salt.
    pub salt: String,
}

impl OfflineConfig {
    fn fresh() -> Self {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        Self {
            algorithm: "argon2id".to_string(),
            version: 0x13,
            memory_kib: ARGON2_MEMORY_MB * 1024,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
            salt: BASE64.encode(salt),
        }
    }
}

/// The result of an offline key derivation.
pub struct OfflineComponents {
    /// Parameters to reproduce the derivation.
    pub config: OfflineConfig,
    /// Raw derived key material. Memory-only; never persisted in clear.
    pub offline_kd: Zeroizing<Vec<u8>>,
    /// Base64 verifier artifact, safe to persist: random bytes
    /// encrypted under a key built from `offline_kd`.
    pub offline_verifier: String,
}

/// Derives the offline key material from a secret and a config.
fn derive_kd(secret: &str, config: &OfflineConfig) -> Result<Zeroizing<Vec<u8>>> {
    if config.algorithm != "argon2id" {
        return Err(AuthError::Encryption(format!(
            "Unsupported derivation algorithm: {}",
            config.algorithm
        )));
    }

    let version = match config.version {
        0x10 => Version::V0x10,
        0x13 => Version::V0x13,
        v => {
            return Err(AuthError::Encryption(format!(
                "Unsupported derivation version: {}",
                v
            )))
        }
    };

    let salt = BASE64
        .decode(&config.salt)
        .map_err(|e| AuthError::Encryption(format!("Invalid derivation salt: {}", e)))?;

    let params = Params::new(
        config.memory_kib,
        config.iterations,
        config.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| AuthError::Encryption(format!("Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, version, params);

    let mut kd = Zeroizing::new(vec![0u8; KEY_SIZE]);
    argon2
        .hash_password_into(secret.as_bytes(), &salt, &mut kd)
        .map_err(|e| AuthError::Encryption(format!("Argon2 key derivation error: {}", e)))?;

    Ok(kd)
}

/// Imports raw offline key material as a symmetric key.
pub fn kd_key(offline_kd: &[u8]) -> Result<SecureKey> {
    SecureKey::from_slice(offline_kd)
}

/// Validates offline key material against its verifier by attempting
/// to decrypt the verifier. The decryption outcome is the only proof
/// the material is correct; raw bytes are never compared directly.
pub fn check_verifier(offline_kd: &[u8], verifier: &str) -> Result<()> {
    let key = kd_key(offline_kd)?;
    let data = BASE64
        .decode(verifier)
        .map_err(|e| AuthError::Encryption(format!("Invalid verifier encoding: {}", e)))?;

    aes::decrypt(&key, EncryptionTag::Offline, &data)?;
    Ok(())
}

/// Derives the full offline component set from a user secret with
/// fresh parameters. Slow by design (memory/CPU-hard).
pub fn derive_offline_components(secret: &str) -> Result<OfflineComponents> {
    let config = OfflineConfig::fresh();
    let offline_kd = derive_kd(secret, &config)?;

    let mut payload = [0u8; VERIFIER_PAYLOAD_SIZE];
    OsRng.fill_bytes(&mut payload);

    let key = kd_key(&offline_kd)?;
    let encrypted = aes::encrypt(&key, EncryptionTag::Offline, &payload)?;
    let offline_verifier = BASE64.encode(encrypted);

    tracing::debug!("Offline components derived");

    Ok(OfflineComponents {
        config,
        offline_kd,
        offline_verifier,
    })
}

/// Verifies a candidate secret against a stored config and verifier,
/// returning the recovered key material on success.
///
/// A verifier that fails to decrypt means a wrong secret, surfaced as
/// [`AuthError::WrongSecret`] so the retry policy can account for it.
pub fn verify_offline_password(
    secret: &str,
    config: &OfflineConfig,
    verifier: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    let offline_kd = derive_kd(secret, config)?;

    match check_verifier(&offline_kd, verifier) {
        Ok(()) => Ok(offline_kd),
        Err(_) => Err(AuthError::WrongSecret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cheap parameters so the test suite stays fast.
    fn fast_config() -> OfflineConfig {
        OfflineConfig {
            algorithm: "argon2id".to_string(),
            version: 0x13,
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
            salt: BASE64.encode([7u8; SALT_SIZE]),
        }
    }

    #[test]
    fn derivation_is_deterministic_under_a_config() {
        let config = fast_config();
        let a = derive_kd("secret", &config).unwrap();
        let b = derive_kd("secret", &config).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn verify_recovers_key_material() {
        let config = fast_config();
        let kd = derive_kd("secret", &config).unwrap();
        let key = kd_key(&kd).unwrap();
        let verifier =
            BASE64.encode(aes::encrypt(&key, EncryptionTag::Offline, &[1u8; 32]).unwrap());

        let recovered = verify_offline_password("secret", &config, &verifier).unwrap();
        assert_eq!(*recovered, *kd);
    }

    #[test]
    fn wrong_secret_is_rejected_via_verifier() {
        let config = fast_config();
        let kd = derive_kd("secret", &config).unwrap();
        let key = kd_key(&kd).unwrap();
        let verifier =
            BASE64.encode(aes::encrypt(&key, EncryptionTag::Offline, &[1u8; 32]).unwrap());

        match verify_offline_password("not the secret", &config, &verifier) {
            Err(AuthError::WrongSecret) => {}
            other => panic!("expected WrongSecret, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unsupported_algorithm_is_loud() {
        let mut config = fast_config();
        config.algorithm = "pbkdf2".to_string();
        assert!(derive_kd("secret", &config).is_err());
    }
}
