use crate::capabilities::LockEvent;
use crate::error::AuthError;
use crate::lock::{apply_lock, LockContext};
use crate::persist;
use crate::session::LockMode;

/// Accounts a failed unlock attempt under the shared retry policy and
/// returns the error the caller must surface.
///
/// Below the ceiling the counter is incremented and persisted by
/// patching only the envelope field, never re-encrypting the blob. At
/// the ceiling the mechanism is torn down: counter reset, wrapped key
/// material cleared, forced fallback to a password lock, soft lock
/// broadcast to sibling contexts.
///
/// Pure transport timeouts are exempt from counting unless the policy
/// says otherwise; the operation still fails.
pub(crate) fn register_failure<N, P>(
    ctx: &LockContext<'_, N, P>,
    mechanism: LockMode,
    attempted: u32,
    err: AuthError,
) -> AuthError {
    if matches!(err, AuthError::Timeout) && !ctx.policy.timeout_consumes_retry {
        tracing::warn!("⚠️  Unlock timed out, not counted as an attempt");
        apply_lock(ctx.store, mechanism);
        ctx.broadcast.broadcast(LockEvent::Locked {
            mode: mechanism,
            soft: true,
        });
        return err;
    }

    if attempted >= ctx.policy.retry_ceiling {
        tracing::warn!(
            "❌ Unlock retry ceiling reached ({}), falling back to password lock",
            ctx.policy.retry_ceiling
        );

        ctx.store.set_unlock_retry_count(0);
        ctx.store.set_encrypted_offline_kd(None);
        ctx.store.set_lock_mode(LockMode::Password);
        apply_lock(ctx.store, LockMode::Password);

        // Mechanism downgrade is a security-relevant transition:
        // replace the whole envelope rather than patching a field.
        if let Err(e) = persist::persist_session(ctx.store) {
            tracing::error!("❌ Failed to persist fallback state: {}", e);
        }

        ctx.broadcast.broadcast(LockEvent::Locked {
            mode: LockMode::Password,
            soft: true,
        });

        return AuthError::TooManyRetries;
    }

    tracing::warn!("⚠️  Unlock failed, attempt {} recorded", attempted);
    ctx.store.set_unlock_retry_count(attempted);
    persist::patch_retry_count(ctx.store, attempted);
    apply_lock(ctx.store, mechanism);
    ctx.broadcast.broadcast(LockEvent::Locked {
        mode: mechanism,
        soft: true,
    });

    err
}

/// Tears down a corrupted mechanism without consuming a retry slot.
///
/// A wrapped key that decrypts but fails the verifier check can never
/// succeed on retry, so the session falls back to a password lock
/// immediately and the user is not blamed for a wrong entry. The
/// retry counter is left untouched: it only ever resets on a
/// successful unlock or at the ceiling.
pub(crate) fn corruption_fallback<N, P>(ctx: &LockContext<'_, N, P>) -> AuthError {
    tracing::error!("❌ Lock material corrupted, forcing password fallback");

    ctx.store.set_encrypted_offline_kd(None);
    ctx.store.set_lock_mode(LockMode::Password);
    apply_lock(ctx.store, LockMode::Password);

    if let Err(e) = persist::persist_session(ctx.store) {
        tracing::error!("❌ Failed to persist fallback state: {}", e);
    }

    ctx.broadcast.broadcast(LockEvent::Locked {
        mode: LockMode::Password,
        soft: true,
    });

    AuthError::Corrupted
}
