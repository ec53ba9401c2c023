use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use zeroize::Zeroizing;

use crate::capabilities::{NetworkVerifier, PlatformKeys};
use crate::crypto::offline;
use crate::error::{AuthError, Result};
use crate::lock::{
    apply_lock, clear_lock_state, commit_unlock, register_failure, ttl_expired, BeforeCreateHook,
    LockContext, LockStatus,
};
use crate::persist;
use crate::session::LockMode;
use crate::time::epoch;

/// Password locking rides on the offline configuration: the user's
/// secret is verified locally against the offline verifier, so an
/// offline boot can rely on this mechanism.
pub(crate) async fn check<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
) -> Result<LockStatus> {
    tracing::debug!("[PasswordLock] checking lock");

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
        mode: LockMode::Password,
        locked,
        ttl: store.lock_ttl(),
    })
}

/// Creating a password lock first verifies the user password against
/// the live account; only then are the offline components computed.
pub(crate) async fn create<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
    secret: &str,
    ttl: u32,
    on_before_create: Option<BeforeCreateHook<'_>>,
) -> Result<LockStatus> {
    tracing::info!("[PasswordLock] creating password lock");

    let verified = ctx.network.confirm_password(secret).await?;
    if !verified {
        return Err(AuthError::WrongSecret);
    }

    let store = ctx.store;

    // Derivation happens before the hook, but nothing is written to
    // the store until both the verification and the hook have passed.
    let fresh = if store.has_offline_password() {
        None
    } else {
        Some(offline::derive_offline_components(secret)?)
    };

    if let Some(hook) = on_before_create {
        hook()?;
    }

    if let Some(components) = fresh {
        store.set_offline_config(Some(&components.config));
        store.set_offline_kd(Some(&BASE64.encode(&*components.offline_kd)));
        store.set_offline_verifier(Some(&components.offline_verifier));
    }

    store.set_lock_mode(LockMode::Password);
    store.set_lock_ttl(Some(ttl));
    store.set_lock_last_extend_time(Some(epoch()));
    store.set_unlock_retry_count(0);
    store.set_locked(false);

    persist::persist_session(store)?;

    Ok(LockStatus {
        mode: LockMode::Password,
        locked: false,
        ttl: Some(ttl),
    })
}

pub(crate) async fn delete<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
) -> Result<LockStatus> {
    tracing::info!("[PasswordLock] deleting password lock");

    clear_lock_state(ctx.store);
    persist::persist_session(ctx.store)?;

    Ok(LockStatus {
        mode: LockMode::None,
        locked: false,
        ttl: None,
    })
}

pub(crate) async fn lock<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
) -> Result<LockStatus> {
    tracing::info!("[PasswordLock] locking session");
    Ok(apply_lock(ctx.store, LockMode::Password))
}

/// Unlocking re-derives key material from the candidate secret with
/// the stored config and proves it by decrypting the offline verifier.
/// Raw derived bytes are never compared directly.
pub(crate) async fn unlock<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
    secret: &str,
) -> Result<Zeroizing<String>> {
    let store = ctx.store;
    let attempted = store.unlock_retry_count() + 1;
    let entry_version = store.lock_version();

    let config = store
        .offline_config()
        .ok_or(AuthError::MissingConfig("offline config"))?;
    let verifier = store
        .offline_verifier()
        .ok_or(AuthError::MissingConfig("offline verifier"))?;

    match offline::verify_offline_password(secret, &config, &verifier) {
        Ok(offline_kd) => {
            let kd = Zeroizing::new(BASE64.encode(&*offline_kd));
            commit_unlock(ctx, LockMode::Password, Some(&kd), entry_version)?;
            tracing::info!("✅ [PasswordLock] session unlocked");
            Ok(kd)
        }
        Err(err) => Err(register_failure(ctx, LockMode::Password, attempted, err)),
    }
}
