use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use zeroize::Zeroizing;

use crate::capabilities::{NetworkVerifier, PlatformKeys};
use crate::crypto::aes::{self, EncryptionTag, SecureKey};
use crate::crypto::offline;
use crate::error::{AuthError, Result};
use crate::lock::{
    apply_lock, clear_lock_state, commit_unlock, corruption_fallback, register_failure,
    ttl_expired, BeforeCreateHook, LockContext, LockStatus,
};
use crate::persist;
use crate::session::LockMode;
use crate::time::epoch;

pub(crate) async fn check<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
) -> Result<LockStatus> {
    tracing::debug!("[BiometricsLock] checking lock");

    let store = ctx.store;
    if store.offline_config().is_none() || store.offline_verifier().is_none() {
        return Ok(LockStatus {
            mode: LockMode::None,
            locked: false,
            ttl: None,
        });
    }

    let locked = store.locked() || ttl_expired(store);
    if !locked {
        store.set_lock_last_extend_time(Some(epoch()));
    }

    Ok(LockStatus {
        mode: LockMode::Biometrics,
        locked,
        ttl: store.lock_ttl(),
    })
}

/// Creating a biometrics lock first verifies the user password against
/// the live account, then wraps the offline key material under a
/// platform wrapping key. Online-only by design.
pub(crate) async fn create<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
    secret: &str,
    ttl: u32,
    on_before_create: Option<BeforeCreateHook<'_>>,
) -> Result<LockStatus> {
    tracing::info!("[BiometricsLock] creating biometrics lock");

    let verified = ctx.network.confirm_password(secret).await?;
    if !verified {
        return Err(AuthError::WrongSecret);
    }

    let store = ctx.store;

    // Derivation and wrapping happen before the hook, but nothing is
    // written to the store until both the verification and the hook
    // have passed.
    let fresh = if store.has_offline_password() {
        None
    } else {
        Some(offline::derive_offline_components(secret)?)
    };

    let kd_b64 = fresh
        .as_ref()
        .map(|components| BASE64.encode(&*components.offline_kd))
        .or_else(|| store.offline_kd())
        .ok_or(AuthError::MissingConfig("offline key material"))?;
    let kd = Zeroizing::new(
        BASE64
            .decode(&kd_b64)
            .map_err(|e| AuthError::Encryption(format!("Invalid key encoding: {}", e)))?,
    );

    let wrapping_key = ctx.platform.generate_wrapping_key().await?;
    let wrapped = aes::encrypt(&wrapping_key, EncryptionTag::BiometricOfflineKd, &kd)?;

    if let Some(hook) = on_before_create {
        hook()?;
    }

    if let Some(components) = fresh {
        store.set_offline_config(Some(&components.config));
        store.set_offline_kd(Some(&kd_b64));
        store.set_offline_verifier(Some(&components.offline_verifier));
    }

    store.set_encrypted_offline_kd(Some(&BASE64.encode(wrapped)));
    store.set_lock_mode(LockMode::Biometrics);
    store.set_lock_ttl(Some(ttl));
    store.set_lock_last_extend_time(Some(epoch()));
    store.set_unlock_retry_count(0);
    store.set_locked(false);

    persist::persist_session(store)?;

    Ok(LockStatus {
        mode: LockMode::Biometrics,
        locked: false,
        ttl: Some(ttl),
    })
}

/// Resets every store property relative to the wrapped key material
/// and re-persists accordingly.
pub(crate) async fn delete<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
) -> Result<LockStatus> {
    tracing::info!("[BiometricsLock] deleting biometrics lock");

    clear_lock_state(ctx.store);
    persist::persist_session(ctx.store)?;

    Ok(LockStatus {
        mode: LockMode::None,
        locked: false,
        ttl: None,
    })
}

/// Locking resets the in-memory offline key material. The session
/// lock token goes too, preemptively, in case a user ends up with
/// both a biometrics and an API lock.
pub(crate) async fn lock<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
) -> Result<LockStatus> {
    tracing::info!("[BiometricsLock] locking session");
    Ok(apply_lock(ctx.store, LockMode::Biometrics))
}

/// The mechanism-specific verification steps, separated so the caller
/// can route each failure kind through the right policy path.
fn attempt_unlock(
    store: &crate::auth_store::AuthStore,
    platform_secret: &str,
) -> Result<Zeroizing<String>> {
    // Errors while fetching the platform secret are handled by the
    // host; an empty secret here still counts toward retries.
    if platform_secret.is_empty() {
        return Err(AuthError::Silent("No platform secret available".to_string()));
    }

    if store.offline_config().is_none() {
        return Err(AuthError::MissingConfig("offline config"));
    }

    let (verifier, wrapped_b64) = match (store.offline_verifier(), store.encrypted_offline_kd()) {
        (Some(verifier), Some(wrapped)) => (verifier, wrapped),
        // Config exists but the wrapped material is gone: damaged
        // state, never recoverable by retrying.
        _ => return Err(AuthError::Corrupted),
    };

    let key_bytes = Zeroizing::new(
        BASE64
            .decode(platform_secret)
            .map_err(|_| AuthError::WrongSecret)?,
    );
    let wrapping_key = SecureKey::from_slice(&key_bytes).map_err(|_| AuthError::WrongSecret)?;

    let wrapped = BASE64
        .decode(&wrapped_b64)
        .map_err(|_| AuthError::Corrupted)?;

    // A wrong platform read fails here and is retryable.
    let offline_kd = Zeroizing::new(
        aes::decrypt(&wrapping_key, EncryptionTag::BiometricOfflineKd, &wrapped)
            .map_err(|_| AuthError::WrongSecret)?,
    );

    // The verifier decryption is the only proof the recovered key is
    // correct; a mismatch here means corruption, not a wrong guess.
    offline::check_verifier(&offline_kd, &verifier).map_err(|_| AuthError::Corrupted)?;

    Ok(Zeroizing::new(BASE64.encode(&*offline_kd)))
}

/// Unlocks by unwrapping the offline key material with the platform
/// secret and proving it against the offline verifier.
pub(crate) async fn unlock<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
    platform_secret: &str,
) -> Result<Zeroizing<String>> {
    let store = ctx.store;
    let attempted = store.unlock_retry_count() + 1;
    let entry_version = store.lock_version();

    // The transport may have been flagged as session-locked before an
    // offline boot; reset it so subsequent requests don't fail on
    // stale state.
    ctx.network.reset().await;

    match attempt_unlock(store, platform_secret) {
        Ok(kd) => {
            commit_unlock(ctx, LockMode::Biometrics, Some(&kd), entry_version)?;
            tracing::info!("✅ [BiometricsLock] session unlocked");
            Ok(kd)
        }
        Err(AuthError::Corrupted) => Err(corruption_fallback(ctx)),
        Err(err @ AuthError::MissingConfig(_)) => Err(err),
        Err(err) => Err(register_failure(ctx, LockMode::Biometrics, attempted, err)),
    }
}
