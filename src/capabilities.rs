use crate::crypto::aes::SecureKey;
use crate::error::Result;
use crate::session::{LockMode, Session};

/// Network verification against the live account.
///
/// The lock core never talks to a transport directly; the host wires
/// its API client in through this trait.
#[allow(async_fn_in_trait)]
pub trait NetworkVerifier: Send + Sync {
    /// Confirms a user secret against the live account.
    async fn confirm_password(&self, secret: &str) -> Result<bool>;

    /// Pulls a session-bearing authentication fork for the given
    /// selector (SSO / device-fork flows).
    async fn pull_auth_fork(&self, selector: &str) -> Result<Session>;

    /// Registers a server-side session lock guarded by `pin` and
    /// returns its opaque lock token.
    async fn create_session_lock(&self, pin: &str, ttl: u32) -> Result<String>;

    /// Exchanges the PIN for a fresh session lock token. A wrong PIN
    /// surfaces as [`crate::AuthError::WrongSecret`].
    async fn unlock_session_lock(&self, pin: &str) -> Result<String>;

    /// Tears down the server-side session lock, authorized by the
    /// stored lock token.
    async fn delete_session_lock(&self, token: &str) -> Result<()>;

    /// Resets transport state. A prior mechanism may have flagged the
    /// session as remotely locked; the reset keeps subsequent
    /// requests from failing on stale state.
    async fn reset(&self);
}

/// Platform secret / biometric backend.
#[allow(async_fn_in_trait)]
pub trait PlatformKeys: Send + Sync {
    /// Generates (and registers with the platform) a new wrapping key.
    async fn generate_wrapping_key(&self) -> Result<SecureKey>;

    /// Re-obtains the wrapping key, typically behind a biometric
    /// prompt. `None` means the platform could not produce a secret
    /// (prompt dismissed, hardware unavailable): a silent failure.
    async fn wrapping_key(&self) -> Result<Option<SecureKey>>;
}

/// A lock transition observed by sibling execution contexts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockEvent {
    /// The session locked under a mechanism. `soft` marks a
    /// policy-triggered transition rather than an explicit user
    /// action.
    Locked { mode: LockMode, soft: bool },
    /// The session unlocked.
    Unlocked { mode: LockMode },
    /// The active mechanism changed (e.g., forced password fallback).
    ModeChanged { mode: LockMode },
    /// The session was destroyed.
    SignedOut,
}

/// Fire-and-forget notification channel to sibling execution contexts
/// of the same logical session.
///
/// Delivery is best-effort and at-most-once. Correctness never depends
/// on it: every context re-derives lock state from the persisted
/// session on its own resume path and treats these events as hints.
pub trait LockBroadcast: Send + Sync {
    /// Broadcasts a lock transition. Must not block or fail.
    fn broadcast(&self, event: LockEvent);
}

/// A broadcast sink that drops every event.
pub struct NoopBroadcast;

impl LockBroadcast for NoopBroadcast {
    fn broadcast(&self, _event: LockEvent) {}
}
