use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::sync::Mutex;
use tokio::time::timeout;
use zeroize::Zeroizing;

use crate::auth_store::AuthStore;
use crate::capabilities::{LockBroadcast, LockEvent, NetworkVerifier, PlatformKeys};
use crate::config::LockPolicy;
use crate::error::{AuthError, Result};
use crate::lock::{apply_lock, BeforeCreateHook, LockAdapter, LockContext, LockStatus};
use crate::persist;
use crate::session::{LockMode, PersistedSession, Session};

/// How a lock transition should be carried out.
#[derive(Clone, Copy, Debug, Default)]
pub struct LockOptions {
    /// Policy-triggered transition rather than explicit user action.
    pub soft: bool,
    /// Whether to notify sibling execution contexts.
    pub broadcast: bool,
}

/// Selects the active lock adapter, persists sessions and broadcasts
/// lock transitions to sibling execution contexts.
///
/// Owns the one store instance and hands it to every adapter call;
/// lock-mutating operations are mutually exclusive per session, so a
/// second concurrent attempt waits its turn rather than interleaving.
pub struct AuthOrchestrator<N, P> {
    store: Arc<AuthStore>,
    network: N,
    platform: P,
    broadcast: Arc<dyn LockBroadcast>,
    policy: LockPolicy,
    op_lock: Mutex<()>,
}

impl<N: NetworkVerifier, P: PlatformKeys> AuthOrchestrator<N, P> {
    /// Creates a new orchestrator over injected collaborators.
    pub fn new(
        store: Arc<AuthStore>,
        network: N,
        platform: P,
        broadcast: Arc<dyn LockBroadcast>,
        policy: LockPolicy,
    ) -> Self {
        Self {
            store,
            network,
            platform,
            broadcast,
            policy,
            op_lock: Mutex::new(()),
        }
    }

    /// The session store this orchestrator owns.
    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    fn ctx(&self) -> LockContext<'_, N, P> {
        LockContext {
            store: &self.store,
            network: &self.network,
            platform: &self.platform,
            broadcast: self.broadcast.as_ref(),
            policy: &self.policy,
        }
    }

    /// The adapter for the currently configured mechanism.
    fn active_adapter(&self) -> Option<LockAdapter> {
        LockAdapter::from_mode(self.store.lock_mode())
    }

    /// Probes the active mechanism. `{None, unlocked}` when no lock is
    /// configured.
    pub async fn check_lock(&self) -> Result<LockStatus> {
        match self.active_adapter() {
            Some(adapter) => adapter.check(&self.ctx()).await,
            None => Ok(LockStatus {
                mode: LockMode::None,
                locked: false,
                ttl: None,
            }),
        }
    }

    /// Establishes a lock under the requested mechanism.
    pub async fn create_lock(
        &self,
        mode: LockMode,
        secret: &str,
        ttl: u32,
        on_before_create: Option<BeforeCreateHook<'_>>,
    ) -> Result<LockStatus> {
        let _guard = self.op_lock.lock().await;

        let adapter = LockAdapter::from_mode(mode)
            .ok_or(AuthError::MissingConfig("cannot create a lock of mode None"))?;
        let status = adapter
            .create(&self.ctx(), secret, ttl, on_before_create)
            .await?;

        self.broadcast.broadcast(LockEvent::ModeChanged { mode });
        Ok(status)
    }

    /// Removes the active lock entirely.
    pub async fn delete_lock(&self) -> Result<LockStatus> {
        let _guard = self.op_lock.lock().await;

        let status = match self.active_adapter() {
            Some(adapter) => adapter.delete(&self.ctx()).await?,
            None => LockStatus {
                mode: LockMode::None,
                locked: false,
                ttl: None,
            },
        };

        self.broadcast
            .broadcast(LockEvent::ModeChanged { mode: LockMode::None });
        Ok(status)
    }

    /// Locks the session. Safe to call with no mechanism configured.
    pub async fn lock(&self, options: LockOptions) -> Result<LockStatus> {
        let _guard = self.op_lock.lock().await;

        let status = match self.active_adapter() {
            Some(adapter) => adapter.lock(&self.ctx()).await?,
            None => apply_lock(&self.store, LockMode::None),
        };

        if options.broadcast {
            self.broadcast.broadcast(LockEvent::Locked {
                mode: status.mode,
                soft: options.soft,
            });
        }
        Ok(status)
    }

    /// Unlocks the session with the active mechanism.
    ///
    /// For the biometrics mechanism `secret` may be `None`: the
    /// platform secret is then fetched through the platform
    /// capability, and an unavailable secret flows into the adapter as
    /// a silent (but counted) failure.
    pub async fn unlock(&self, secret: Option<&str>) -> Result<Zeroizing<String>> {
        let _guard = self.op_lock.lock().await;

        let adapter = self
            .active_adapter()
            .ok_or(AuthError::MissingConfig("no lock configured"))?;

        let fetched;
        let secret = match (adapter, secret) {
            (LockAdapter::Biometrics, None) => {
                // The platform prompt is interactive and may never be
                // answered; it gets the same hard deadline as any other
                // unlock step. A lapsed deadline surfaces as `Timeout`,
                // which the retry policy exempts.
                let key = timeout(self.policy.unlock_timeout, self.platform.wrapping_key())
                    .await
                    .map_err(|_| AuthError::Timeout)??;
                fetched = match key {
                    Some(key) => Zeroizing::new(BASE64.encode(key.as_bytes())),
                    None => Zeroizing::new(String::new()),
                };
                fetched.as_str()
            }
            (_, secret) => secret.unwrap_or(""),
        };

        adapter.unlock(&self.ctx(), secret).await
    }

    /// Encrypts and writes the current session to durable storage.
    pub async fn persist_session(&self) -> Result<()> {
        persist::persist_session(&self.store)
    }

    /// Attempts resumption from a raw persisted envelope.
    pub async fn resume_session(&self, raw: &str) -> Result<Session> {
        let persisted: PersistedSession = sonic_rs::from_str(raw)
            .map_err(|e| AuthError::Store(format!("Malformed persisted session: {}", e)))?;
        persist::resume_session(&self.store, &persisted)
    }

    /// Pulls a session-bearing authentication fork (SSO / device-fork
    /// flows) under a hard deadline, hydrates the store and persists.
    pub async fn consume_fork(&self, selector: &str) -> Result<Session> {
        let _guard = self.op_lock.lock().await;

        let session = timeout(
            self.policy.fork_timeout,
            self.network.pull_auth_fork(selector),
        )
        .await
        .map_err(|_| AuthError::Timeout)??;

        if !session.valid() {
            return Err(AuthError::Fatal(
                "Auth fork yielded an invalid session".to_string(),
            ));
        }

        tracing::info!("✅ Auth fork consumed");
        self.store.apply(session.into());
        persist::persist_session(&self.store)?;
        Ok(self.store.session())
    }

    /// Destroys the session: clears every field, removes the persisted
    /// envelope and notifies sibling contexts.
    pub async fn sign_out(&self) {
        let _guard = self.op_lock.lock().await;

        tracing::info!("Signing out, clearing session state");
        self.store.remove_persisted_session();
        self.store.clear();
        self.broadcast.broadcast(LockEvent::SignedOut);
    }
}
