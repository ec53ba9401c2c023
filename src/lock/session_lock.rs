use subtle::ConstantTimeEq;
use tokio::time::timeout;
use zeroize::Zeroizing;

use crate::capabilities::{NetworkVerifier, PlatformKeys};
use crate::error::{AuthError, Result};
use crate::lock::{
    apply_lock, clear_lock_state, commit_unlock, register_failure, ttl_expired, BeforeCreateHook,
    LockContext, LockStatus,
};
use crate::persist;
use crate::session::LockMode;
use crate::time::epoch;

pub(crate) async fn check<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
) -> Result<LockStatus> {
    tracing::debug!("[SessionLock] checking lock");

    let store = ctx.store;
    if store.lock_token().is_none() {
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
        mode: LockMode::PinOrSession,
        locked,
        ttl: store.lock_ttl(),
    })
}

/// Registers a server-side session lock guarded by the PIN. The round
/// trip is the online verification itself: no store field mutates
/// until the server has accepted the lock.
///
/// Any offline components from a previous mechanism are cleared: a PIN
/// cannot re-derive the key material, so keeping them would leave the
/// session invalid after a successful unlock.
pub(crate) async fn create<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
    pin: &str,
    ttl: u32,
    on_before_create: Option<BeforeCreateHook<'_>>,
) -> Result<LockStatus> {
    tracing::info!("[SessionLock] creating session lock");

    let token = timeout(
        ctx.policy.unlock_timeout,
        ctx.network.create_session_lock(pin, ttl),
    )
    .await
    .map_err(|_| AuthError::Timeout)??;

    if let Some(hook) = on_before_create {
        hook()?;
    }

    let store = ctx.store;
    store.set_offline_config(None);
    store.set_offline_kd(None);
    store.set_offline_verifier(None);
    store.set_encrypted_offline_kd(None);
    store.set_lock_token(Some(&token));
    store.set_lock_mode(LockMode::PinOrSession);
    store.set_lock_ttl(Some(ttl));
    store.set_lock_last_extend_time(Some(epoch()));
    store.set_unlock_retry_count(0);
    store.set_locked(false);

    persist::persist_session(store)?;

    Ok(LockStatus {
        mode: LockMode::PinOrSession,
        locked: false,
        ttl: Some(ttl),
    })
}

/// Tears down the server-side lock (authorized by the stored token),
/// then clears every lock field locally.
pub(crate) async fn delete<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
) -> Result<LockStatus> {
    tracing::info!("[SessionLock] deleting session lock");

    if let Some(token) = ctx.store.lock_token() {
        ctx.network.delete_session_lock(&token).await?;
    }

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
    tracing::info!("[SessionLock] locking session");
    Ok(apply_lock(ctx.store, LockMode::PinOrSession))
}

/// Exchanges the PIN for a fresh lock token under the hard unlock
/// deadline. A transport that never answers surfaces as `Timeout`,
/// which the retry policy may exempt from counting; a wrong PIN is
/// the server's `WrongSecret` and always counts.
pub(crate) async fn unlock<N: NetworkVerifier, P: PlatformKeys>(
    ctx: &LockContext<'_, N, P>,
    pin: &str,
) -> Result<Zeroizing<String>> {
    let store = ctx.store;
    let attempted = store.unlock_retry_count() + 1;
    let entry_version = store.lock_version();

    let outcome = timeout(ctx.policy.unlock_timeout, ctx.network.unlock_session_lock(pin))
        .await
        .map_err(|_| AuthError::Timeout)
        .and_then(|inner| inner);

    match outcome {
        Ok(token) => {
            // Server state may have drifted from what this context
            // last stored; the comparison is constant-time since the
            // token is secret material.
            if let Some(stored) = store.lock_token() {
                let unchanged: bool = stored.as_bytes().ct_eq(token.as_bytes()).into();
                if !unchanged {
                    tracing::debug!("[SessionLock] lock token rotated by server");
                }
            }

            commit_unlock(ctx, LockMode::PinOrSession, None, entry_version)?;
            store.set_lock_token(Some(&token));
            tracing::info!("✅ [SessionLock] session unlocked");
            Ok(Zeroizing::new(token))
        }
        Err(err) => Err(register_failure(ctx, LockMode::PinOrSession, attempted, err)),
    }
}
