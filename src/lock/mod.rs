mod biometrics;
mod password;
mod retry;
mod session_lock;

use zeroize::Zeroizing;

use crate::auth_store::AuthStore;
use crate::capabilities::{LockBroadcast, LockEvent, NetworkVerifier, PlatformKeys};
use crate::config::LockPolicy;
use crate::error::Result;
use crate::persist;
use crate::session::LockMode;
use crate::time::epoch;

/// The result of a lock probe or transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockStatus {
    /// The mechanism this status describes.
    pub mode: LockMode,
    /// Whether the lock is currently active.
    pub locked: bool,
    /// The configured TTL, when the mechanism carries one.
    pub ttl: Option<u32>,
}

/// A caller-supplied hook run after derivation/wrapping but before any
/// store mutation is committed during `create`. Used to confirm one
/// more external precondition (e.g., platform key registration); a
/// failing hook aborts the create with no mutation.
pub type BeforeCreateHook<'a> = &'a dyn Fn() -> Result<()>;

/// Everything a mechanism needs to run, dependency-injected by the
/// orchestrator. No mechanism holds ambient state of its own.
pub struct LockContext<'a, N, P> {
    pub store: &'a AuthStore,
    pub network: &'a N,
    pub platform: &'a P,
    pub broadcast: &'a dyn LockBroadcast,
    pub policy: &'a LockPolicy,
}

/// The closed set of lock mechanisms.
///
/// Each operation dispatches with an exhaustive match, so adding a
/// mechanism without implementing an operation cannot compile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockAdapter {
    /// Master-password lock, verified offline.
    Password,
    /// Platform-biometrics lock wrapping the offline key material.
    Biometrics,
    /// Short PIN backed by a server-side session lock.
    PinOrSession,
}

impl LockAdapter {
    /// Resolves the adapter for a configured lock mode. `None` when no
    /// lock is configured.
    pub fn from_mode(mode: LockMode) -> Option<Self> {
        match mode {
            LockMode::None => None,
            LockMode::Password => Some(LockAdapter::Password),
            LockMode::Biometrics => Some(LockAdapter::Biometrics),
            LockMode::PinOrSession => Some(LockAdapter::PinOrSession),
        }
    }

    /// The lock mode this adapter implements.
    pub fn mode(&self) -> LockMode {
        match self {
            LockAdapter::Password => LockMode::Password,
            LockAdapter::Biometrics => LockMode::Biometrics,
            LockAdapter::PinOrSession => LockMode::PinOrSession,
        }
    }

    /// Non-mutating probe of whether this mechanism is configured and
    /// whether its lock should be considered active. Never requires
    /// network access when offline configuration is present.
    pub async fn check<N: NetworkVerifier, P: PlatformKeys>(
        &self,
        ctx: &LockContext<'_, N, P>,
    ) -> Result<LockStatus> {
        match self {
            LockAdapter::Password => password::check(ctx).await,
            LockAdapter::Biometrics => biometrics::check(ctx).await,
            LockAdapter::PinOrSession => session_lock::check(ctx).await,
        }
    }

    /// Establishes the lock. Online verification of `secret` precedes
    /// any store mutation.
    pub async fn create<N: NetworkVerifier, P: PlatformKeys>(
        &self,
        ctx: &LockContext<'_, N, P>,
        secret: &str,
        ttl: u32,
        on_before_create: Option<BeforeCreateHook<'_>>,
    ) -> Result<LockStatus> {
        match self {
            LockAdapter::Password => password::create(ctx, secret, ttl, on_before_create).await,
            LockAdapter::Biometrics => biometrics::create(ctx, secret, ttl, on_before_create).await,
            LockAdapter::PinOrSession => {
                session_lock::create(ctx, secret, ttl, on_before_create).await
            }
        }
    }

    /// Clears every lock-related field and persists.
    pub async fn delete<N: NetworkVerifier, P: PlatformKeys>(
        &self,
        ctx: &LockContext<'_, N, P>,
    ) -> Result<LockStatus> {
        match self {
            LockAdapter::Password => password::delete(ctx).await,
            LockAdapter::Biometrics => biometrics::delete(ctx).await,
            LockAdapter::PinOrSession => session_lock::delete(ctx).await,
        }
    }

    /// Drops the in-memory key material and flags the session locked.
    /// Idempotent, safe even when the mechanism was never configured.
    pub async fn lock<N: NetworkVerifier, P: PlatformKeys>(
        &self,
        ctx: &LockContext<'_, N, P>,
    ) -> Result<LockStatus> {
        match self {
            LockAdapter::Password => password::lock(ctx).await,
            LockAdapter::Biometrics => biometrics::lock(ctx).await,
            LockAdapter::PinOrSession => session_lock::lock(ctx).await,
        }
    }

    /// Mechanism-specific verification. On success the unlock proof is
    /// returned: the recovered offline key material (base64) for the
    /// password and biometrics mechanisms, the fresh session lock
    /// token for PIN. Failures route through the retry policy before
    /// re-raising.
    pub async fn unlock<N: NetworkVerifier, P: PlatformKeys>(
        &self,
        ctx: &LockContext<'_, N, P>,
        secret: &str,
    ) -> Result<Zeroizing<String>> {
        match self {
            LockAdapter::Password => password::unlock(ctx, secret).await,
            LockAdapter::Biometrics => biometrics::unlock(ctx, secret).await,
            LockAdapter::PinOrSession => session_lock::unlock(ctx, secret).await,
        }
    }
}

/// Whether the configured TTL has expired since the last extend.
pub(crate) fn ttl_expired(store: &AuthStore) -> bool {
    match (store.lock_ttl(), store.lock_last_extend_time()) {
        (Some(ttl), Some(extended_at)) => epoch() - extended_at > i64::from(ttl),
        _ => false,
    }
}

/// Drops the in-memory derived key and any session lock token, flags
/// the session locked and bumps the lock transition version. A second
/// call on an already-locked session is a no-op.
pub(crate) fn apply_lock(store: &AuthStore, mode: LockMode) -> LockStatus {
    let already_locked =
        store.locked() && store.offline_kd().is_none() && store.lock_token().is_none();

    if !already_locked {
        store.set_offline_kd(None);
        store.set_lock_token(None);
        store.set_locked(true);
        store.bump_lock_version();
    }

    LockStatus {
        mode,
        locked: true,
        ttl: store.lock_ttl(),
    }
}

/// Clears every lock-related field: mode, TTL, extend time, retry
/// count and wrapped key material.
pub(crate) fn clear_lock_state(store: &AuthStore) {
    store.set_lock_last_extend_time(None);
    store.set_lock_ttl(None);
    store.set_lock_mode(LockMode::None);
    store.set_locked(false);
    store.set_unlock_retry_count(0);
    store.set_encrypted_offline_kd(None);
    store.set_lock_token(None);
}

/// Commits a successful unlock: restores the key material, clears the
/// locked flag and resets the retry budget.
///
/// Re-validates the lock transition version captured at unlock entry;
/// a version moved by an intervening lock aborts the commit so a
/// late-arriving unlock can never silently resurrect the session.
pub(crate) fn commit_unlock<N, P>(
    ctx: &LockContext<'_, N, P>,
    mode: LockMode,
    offline_kd: Option<&str>,
    expected_version: u64,
) -> Result<()> {
    if ctx.store.lock_version() != expected_version {
        tracing::warn!("⚠️  Lock state changed during unlock, discarding result");
        return Err(crate::error::AuthError::Silent(
            "Lock state changed during unlock".to_string(),
        ));
    }

    if let Some(kd) = offline_kd {
        ctx.store.set_offline_kd(Some(kd));
    }
    ctx.store.set_locked(false);
    ctx.store.set_lock_last_extend_time(Some(epoch()));
    ctx.store.set_unlock_retry_count(0);
    persist::patch_retry_count(ctx.store, 0);
    ctx.broadcast.broadcast(LockEvent::Unlocked { mode });
    Ok(())
}

pub(crate) use retry::{corruption_fallback, register_failure};
