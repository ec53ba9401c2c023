use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::auth_store::AuthStore;
use crate::crypto::aes::{self, EncryptionTag, SecureKey};
use crate::error::{AuthError, Result};
use crate::session::{PersistedSession, Session, SessionUpdate};

/// The sensitive remainder of a session, serialized and encrypted
/// under the client key before it touches durable storage.
///
/// Raw offline key material never rests here: the client key lives in
/// the same store, so the blob protects against casual inspection, not
/// against an attacker holding the store. The only persisted form of
/// the key material is `encrypted_offline_kd`, wrapped under a key the
/// store never holds.
#[derive(Serialize, Deserialize)]
struct SessionBlob {
    key_password: String,
    session_lock_token: Option<String>,
}

/// Gets the per-install client key, creating it on first use.
fn client_key(store: &AuthStore) -> Result<SecureKey> {
    if let Some(encoded) = store.client_key() {
        let bytes = BASE64
            .decode(&encoded)
            .map_err(|e| AuthError::Encryption(format!("Invalid client key encoding: {}", e)))?;
        return SecureKey::from_slice(&bytes);
    }

    let key = aes::generate_key();
    store.set_client_key(&BASE64.encode(key.as_bytes()));
    tracing::info!("🔑 Client key created");
    Ok(key)
}

/// Encrypts the current session into its at-rest envelope and writes
/// it to the store.
pub fn persist_session(store: &AuthStore) -> Result<()> {
    let session = store.session();

    if session.persistent == Some(false) {
        tracing::debug!("Session is non-persistent, skipping persistence");
        return Ok(());
    }

    let key = client_key(store)?;
    let mut blob_plain = sonic_rs::to_string(&SessionBlob {
        key_password: session.key_password.clone(),
        session_lock_token: session.session_lock_token.clone(),
    })
    .map_err(|e| AuthError::Store(format!("Failed to encode session blob: {}", e)))?;

    let encrypted = aes::encrypt(&key, EncryptionTag::SessionBlob, blob_plain.as_bytes());
    blob_plain.zeroize();

    let persisted = PersistedSession {
        uid: session.uid,
        user_id: session.user_id,
        blob: BASE64.encode(encrypted?),
        cookies: session.cookies,
        access_token: (!session.access_token.is_empty()).then_some(session.access_token),
        refresh_token: (!session.refresh_token.is_empty()).then_some(session.refresh_token),
        refresh_time: session.refresh_time,
        local_id: session.local_id,
        persistent: session.persistent,
        lock_mode: session.lock_mode,
        lock_ttl: session.lock_ttl,
        lock_last_extend_time: session.lock_last_extend_time,
        unlock_retry_count: session.unlock_retry_count,
        offline_config: session.offline_config,
        offline_verifier: session.offline_verifier,
        encrypted_offline_kd: session.encrypted_offline_kd,
        two_password_mode: session.two_password_mode,
        extra_password: session.extra_password,
        last_used_at: session.last_used_at,
        sso: session.sso,
        payload_version: session.payload_version,
        user_data: session.user_data,
    };

    store.set_persisted_session(&persisted);
    tracing::debug!("Session persisted");
    Ok(())
}

/// Patches only the retry counter of the persisted envelope, without
/// re-encrypting the blob. Cheap and safe to call on every failed
/// unlock attempt.
pub fn patch_retry_count(store: &AuthStore, count: u32) {
    if let Some(mut persisted) = store.persisted_session() {
        persisted.unlock_retry_count = count;
        store.set_persisted_session(&persisted);
    }
}

/// Decrypts a persisted envelope and hydrates the store from it.
///
/// Ground truth for lock state on resume: broadcast events are only
/// hints, this is what every context re-derives from.
pub fn resume_session(store: &AuthStore, persisted: &PersistedSession) -> Result<Session> {
    if !persisted.valid() {
        return Err(AuthError::Store(
            "Malformed persisted session".to_string(),
        ));
    }

    let key = client_key(store)?;
    let encrypted = BASE64
        .decode(&persisted.blob)
        .map_err(|e| AuthError::Encryption(format!("Invalid blob encoding: {}", e)))?;

    let mut plain = aes::decrypt(&key, EncryptionTag::SessionBlob, &encrypted)?;
    let blob: SessionBlob = sonic_rs::from_slice(&plain)
        .map_err(|e| AuthError::Store(format!("Failed to decode session blob: {}", e)))?;
    plain.zeroize();

    store.apply(SessionUpdate {
        uid: Some(persisted.uid.clone()),
        user_id: Some(persisted.user_id.clone()),
        local_id: persisted.local_id,
        persistent: persisted.persistent,
        access_token: persisted.access_token.clone(),
        refresh_token: persisted.refresh_token.clone(),
        refresh_time: persisted.refresh_time,
        cookies: Some(persisted.cookies),
        key_password: Some(blob.key_password),
        lock_mode: Some(persisted.lock_mode),
        lock_ttl: persisted.lock_ttl,
        lock_last_extend_time: persisted.lock_last_extend_time,
        session_lock_token: blob.session_lock_token,
        unlock_retry_count: Some(persisted.unlock_retry_count),
        offline_config: persisted.offline_config.clone(),
        // Raw key material is never persisted, so a resumed session
        // stays locked until an adapter unlocks it.
        offline_kd: None,
        offline_verifier: persisted.offline_verifier.clone(),
        encrypted_offline_kd: persisted.encrypted_offline_kd.clone(),
        two_password_mode: Some(persisted.two_password_mode),
        extra_password: Some(persisted.extra_password),
        last_used_at: Some(persisted.last_used_at),
        sso: Some(persisted.sso),
        payload_version: Some(persisted.payload_version),
        user_data: persisted.user_data.clone(),
    });

    tracing::info!("✅ Session resumed from persisted envelope");
    Ok(store.session())
}
