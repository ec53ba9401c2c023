use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use once_cell::sync::Lazy;
use sessionlock::crypto::aes::{self, SecureKey};
use sessionlock::{
    AuthError, AuthOrchestrator, AuthStore, KvStore, LockBroadcast, LockEvent, LockMode,
    LockOptions, LockPolicy, NetworkVerifier, PlatformKeys, Result, Session, SessionUpdate,
};

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
});

/// A key-value store that counts every write, so tests can assert
/// that failed operations never touch persistence.
struct SpyStore {
    inner: sessionlock::MemoryStore,
    writes: AtomicUsize,
}

impl SpyStore {
    fn new() -> Self {
        Self {
            inner: sessionlock::MemoryStore::new(),
            writes: AtomicUsize::new(0),
        }
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KvStore for SpyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: String) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value);
    }

    fn remove(&self, key: &str) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(key);
    }

    fn reset(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.reset();
    }
}

#[derive(Clone)]
struct MockNetwork {
    password: Arc<String>,
    pin: Arc<String>,
    unlock_delay: Option<Duration>,
    resets: Arc<AtomicUsize>,
    fork_session: Arc<Mutex<Option<Session>>>,
}

impl MockNetwork {
    fn new(password: &str, pin: &str) -> Self {
        Self {
            password: Arc::new(password.to_string()),
            pin: Arc::new(pin.to_string()),
            unlock_delay: None,
            resets: Arc::new(AtomicUsize::new(0)),
            fork_session: Arc::new(Mutex::new(None)),
        }
    }
}

impl NetworkVerifier for MockNetwork {
    async fn confirm_password(&self, secret: &str) -> Result<bool> {
        Ok(secret == *self.password)
    }

    async fn pull_auth_fork(&self, _selector: &str) -> Result<Session> {
        self.fork_session
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AuthError::Silent("No fork available".to_string()))
    }

    async fn create_session_lock(&self, pin: &str, _ttl: u32) -> Result<String> {
        if pin == *self.pin {
            Ok("server-lock-token".to_string())
        } else {
            Err(AuthError::WrongSecret)
        }
    }

    async fn unlock_session_lock(&self, pin: &str) -> Result<String> {
        if let Some(delay) = self.unlock_delay {
            tokio::time::sleep(delay).await;
        }
        if pin == *self.pin {
            Ok("server-lock-token-2".to_string())
        } else {
            Err(AuthError::WrongSecret)
        }
    }

    async fn delete_session_lock(&self, _token: &str) -> Result<()> {
        Ok(())
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct MockPlatform {
    key: Arc<Mutex<Option<SecureKey>>>,
    prompt_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockPlatform {
    fn new() -> Self {
        Self {
            key: Arc::new(Mutex::new(None)),
            prompt_delay: Arc::new(Mutex::new(None)),
        }
    }

    fn set_key(&self, key: SecureKey) {
        *self.key.lock().unwrap() = Some(key);
    }

    fn clear_key(&self) {
        *self.key.lock().unwrap() = None;
    }

    /// Simulates a biometric prompt the user leaves unanswered.
    fn set_prompt_delay(&self, delay: Duration) {
        *self.prompt_delay.lock().unwrap() = Some(delay);
    }
}

impl PlatformKeys for MockPlatform {
    async fn generate_wrapping_key(&self) -> Result<SecureKey> {
        let key = aes::generate_key();
        self.set_key(key.clone());
        Ok(key)
    }

    async fn wrapping_key(&self) -> Result<Option<SecureKey>> {
        let delay = *self.prompt_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.key.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct RecordingBroadcast {
    events: Mutex<Vec<LockEvent>>,
}

impl RecordingBroadcast {
    fn events(&self) -> Vec<LockEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl LockBroadcast for RecordingBroadcast {
    fn broadcast(&self, event: LockEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct TestContext {
    kv: Arc<SpyStore>,
    store: Arc<AuthStore>,
    network: MockNetwork,
    platform: MockPlatform,
    broadcast: Arc<RecordingBroadcast>,
    auth: AuthOrchestrator<MockNetwork, MockPlatform>,
}

impl TestContext {
    fn new() -> Self {
        Self::with_policy(LockPolicy::default())
    }

    fn with_policy(policy: LockPolicy) -> Self {
        Lazy::force(&TRACING);

        let kv = Arc::new(SpyStore::new());
        let store = Arc::new(AuthStore::new(kv.clone()));
        let network = MockNetwork::new("master-password", "1234");
        let platform = MockPlatform::new();
        let broadcast = Arc::new(RecordingBroadcast::default());
        let auth = AuthOrchestrator::new(
            store.clone(),
            network.clone(),
            platform.clone(),
            broadcast.clone(),
            policy,
        );

        Self {
            kv,
            store,
            network,
            platform,
            broadcast,
            auth,
        }
    }

    /// Seeds a signed-in cookie session.
    fn sign_in(&self) {
        self.store.apply(SessionUpdate {
            uid: Some("uid-1".to_string()),
            user_id: Some("user-1".to_string()),
            key_password: Some("key-password".to_string()),
            cookies: Some(true),
            ..Default::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Property 1: round trip through the store preserves every field
    // the validity predicate inspects.
    #[test]
    fn session_round_trip() {
        let context = TestContext::new();
        let session = Session {
            uid: "uid-1".to_string(),
            user_id: "user-1".to_string(),
            key_password: "key-password".to_string(),
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            cookies: false,
            lock_mode: LockMode::Password,
            lock_ttl: Some(600),
            unlock_retry_count: 0,
            last_used_at: 1_700_000_000,
            payload_version: 1,
            ..Default::default()
        };
        assert!(session.valid());

        context.store.apply(SessionUpdate::from(session.clone()));
        let restored = context.store.session();

        assert_eq!(restored, session);
        assert!(context.store.valid_session(&restored));
    }

    // Property 2: the validity predicate.
    #[test]
    fn validity_predicate() {
        let context = TestContext::new();

        let minimal = Session {
            uid: "uid-1".to_string(),
            user_id: "user-1".to_string(),
            key_password: "kp".to_string(),
            cookies: true,
            ..Default::default()
        };
        assert!(context.store.valid_session(&minimal));

        let mut no_password = minimal.clone();
        no_password.key_password = String::new();
        no_password.access_token = "at".to_string();
        no_password.refresh_token = "rt".to_string();
        assert!(!context.store.valid_session(&no_password));

        let mut no_transport = minimal.clone();
        no_transport.cookies = false;
        assert!(!context.store.valid_session(&no_transport));
    }

    // Property 3: retry monotonicity and reset at the ceiling.
    #[tokio::test]
    async fn retry_counting_and_forced_fallback() {
        let context = TestContext::new();
        context.sign_in();

        context
            .auth
            .create_lock(LockMode::Biometrics, "master-password", 600, None)
            .await
            .unwrap();

        // Replace the platform key so every unlock attempt fails.
        context.platform.set_key(aes::generate_key());

        for expected in 1..=2u32 {
            let err = context.auth.unlock(None).await.unwrap_err();
            assert!(matches!(err, AuthError::WrongSecret), "got {:?}", err);
            assert_eq!(context.store.unlock_retry_count(), expected);
            assert_eq!(context.store.lock_mode(), LockMode::Biometrics);
        }

        let err = context.auth.unlock(None).await.unwrap_err();
        assert!(matches!(err, AuthError::TooManyRetries), "got {:?}", err);
        assert_eq!(context.store.unlock_retry_count(), 0);
        assert_eq!(context.store.lock_mode(), LockMode::Password);
        assert!(context.store.encrypted_offline_kd().is_none());

        // The downgrade was broadcast as a soft lock.
        assert!(context.broadcast.events().contains(&LockEvent::Locked {
            mode: LockMode::Password,
            soft: true,
        }));
    }

    // Property 4: corruption bypasses retry counting.
    #[tokio::test]
    async fn corruption_forces_fallback_without_consuming_a_retry() {
        let context = TestContext::new();
        context.sign_in();

        context
            .auth
            .create_lock(LockMode::Biometrics, "master-password", 600, None)
            .await
            .unwrap();

        // Damage the verifier: the platform secret is correct, the
        // wrapped key decrypts, but the verifier check cannot pass.
        let garbage = aes::encrypt(&aes::generate_key(), aes::EncryptionTag::Offline, &[9u8; 32])
            .unwrap();
        context.store.set_offline_verifier(Some(&BASE64.encode(garbage)));

        let err = context.auth.unlock(None).await.unwrap_err();
        assert!(matches!(err, AuthError::Corrupted), "got {:?}", err);
        assert_eq!(context.store.unlock_retry_count(), 0);
        assert_eq!(context.store.lock_mode(), LockMode::Password);
        assert!(context.store.encrypted_offline_kd().is_none());
    }

    // Property 5: create is verify-before-mutate.
    #[tokio::test]
    async fn failed_verification_leaves_the_store_untouched() {
        let context = TestContext::new();
        context.sign_in();
        let writes_before = context.kv.writes();

        let err = context
            .auth
            .create_lock(LockMode::Biometrics, "not-the-password", 600, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::WrongSecret), "got {:?}", err);
        assert_eq!(context.kv.writes(), writes_before);
        assert_eq!(context.store.lock_mode(), LockMode::None);
        assert!(context.store.persisted_session().is_none());
    }

    #[tokio::test]
    async fn failed_hook_leaves_the_store_untouched() {
        let context = TestContext::new();
        context.sign_in();
        let writes_before = context.kv.writes();

        let hook = || -> Result<()> { Err(AuthError::Fatal("registration refused".to_string())) };
        let err = context
            .auth
            .create_lock(LockMode::Biometrics, "master-password", 600, Some(&hook))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Fatal(_)), "got {:?}", err);
        assert_eq!(context.kv.writes(), writes_before);
        assert!(context.store.offline_config().is_none());
    }

    // Property 6: lock is idempotent, even unconfigured.
    #[tokio::test]
    async fn lock_is_idempotent() {
        let context = TestContext::new();
        context.sign_in();

        context.auth.lock(LockOptions::default()).await.unwrap();
        assert!(context.store.locked());
        let version = context.store.lock_version();

        context.auth.lock(LockOptions::default()).await.unwrap();
        assert!(context.store.locked());
        assert_eq!(context.store.lock_version(), version);
    }

    // Property 7: the end-to-end biometrics scenario.
    #[tokio::test]
    async fn biometrics_unlock_end_to_end() {
        let context = TestContext::new();
        context.sign_in();

        context
            .auth
            .create_lock(LockMode::Biometrics, "master-password", 600, None)
            .await
            .unwrap();

        // Freshly-resumed shape: config present, key material dropped.
        context.auth.lock(LockOptions::default()).await.unwrap();
        assert!(context.store.offline_kd().is_none());
        assert!(context.store.locked());

        // Correct platform secret: key material restored, unlocked.
        // The transport is reset first, in case a prior mechanism left
        // it flagged as session-locked.
        let kd = context.auth.unlock(None).await.unwrap();
        assert!(context.network.resets.load(Ordering::SeqCst) >= 1);
        assert!(!kd.is_empty());
        assert_eq!(context.store.offline_kd().as_deref(), Some(kd.as_str()));
        assert!(!context.store.locked());
        assert_eq!(context.store.unlock_retry_count(), 0);

        // Incorrect platform secret: one retry consumed, same mode.
        context.platform.set_key(aes::generate_key());
        let err = context.auth.unlock(None).await.unwrap_err();
        assert!(matches!(err, AuthError::WrongSecret), "got {:?}", err);
        assert_eq!(context.store.unlock_retry_count(), 1);
        assert_eq!(context.store.lock_mode(), LockMode::Biometrics);
    }

    #[tokio::test]
    async fn missing_platform_secret_is_silent_but_counted() {
        let context = TestContext::new();
        context.sign_in();

        context
            .auth
            .create_lock(LockMode::Biometrics, "master-password", 600, None)
            .await
            .unwrap();
        context.platform.clear_key();

        let err = context.auth.unlock(None).await.unwrap_err();
        assert!(matches!(err, AuthError::Silent(_)), "got {:?}", err);
        assert_eq!(context.store.unlock_retry_count(), 1);
        assert_eq!(context.store.lock_mode(), LockMode::Biometrics);
    }

    #[tokio::test]
    async fn pin_lock_round_trip() {
        let context = TestContext::new();
        context.sign_in();

        let status = context
            .auth
            .create_lock(LockMode::PinOrSession, "1234", 300, None)
            .await
            .unwrap();
        assert_eq!(status.mode, LockMode::PinOrSession);

        // The lock token never rests in clear in the store.
        let raw = context.kv.get("auth:lock_token").unwrap();
        assert!(!raw.contains("server-lock-token"));

        context.auth.lock(LockOptions::default()).await.unwrap();

        let err = context.auth.unlock(Some("9999")).await.unwrap_err();
        assert!(matches!(err, AuthError::WrongSecret), "got {:?}", err);
        assert_eq!(context.store.unlock_retry_count(), 1);

        context.auth.unlock(Some("1234")).await.unwrap();
        assert!(!context.store.locked());
        assert_eq!(context.store.unlock_retry_count(), 0);
    }

    #[tokio::test]
    async fn unanswered_platform_prompt_times_out() {
        let mut context = TestContext::new();
        context.sign_in();

        context
            .auth
            .create_lock(LockMode::Biometrics, "master-password", 600, None)
            .await
            .unwrap();

        // A prompt the user never answers must not hang unlock past
        // the policy deadline.
        context.platform.set_prompt_delay(Duration::from_secs(60));
        context.auth = AuthOrchestrator::new(
            context.store.clone(),
            context.network.clone(),
            context.platform.clone(),
            context.broadcast.clone(),
            LockPolicy {
                unlock_timeout: Duration::from_millis(10),
                ..LockPolicy::default()
            },
        );

        let err = context.auth.unlock(None).await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout), "got {:?}", err);
        assert_eq!(context.store.unlock_retry_count(), 0);
    }

    #[tokio::test]
    async fn pin_lock_replaces_an_offline_capable_lock_cleanly() {
        let context = TestContext::new();
        context.sign_in();

        context
            .auth
            .create_lock(LockMode::Password, "master-password", 600, None)
            .await
            .unwrap();
        assert!(context.store.offline_config().is_some());

        context
            .auth
            .create_lock(LockMode::PinOrSession, "1234", 300, None)
            .await
            .unwrap();
        assert!(context.store.offline_config().is_none());
        assert!(context.store.offline_verifier().is_none());

        context.auth.lock(LockOptions::default()).await.unwrap();
        context.auth.unlock(Some("1234")).await.unwrap();

        // A successfully unlocked session must be valid even though the
        // PIN mechanism carries no offline key material.
        assert!(!context.store.locked());
        assert!(context.store.valid_session(&context.store.session()));
    }

    #[tokio::test]
    async fn transport_timeout_does_not_consume_a_retry_by_default() {
        let mut context = TestContext::new();
        context.sign_in();

        context
            .auth
            .create_lock(LockMode::PinOrSession, "1234", 300, None)
            .await
            .unwrap();

        // Rebuild with a transport that never answers in time.
        let mut slow_network = context.network.clone();
        slow_network.unlock_delay = Some(Duration::from_millis(100));
        let policy = LockPolicy {
            unlock_timeout: Duration::from_millis(10),
            ..LockPolicy::default()
        };
        context.auth = AuthOrchestrator::new(
            context.store.clone(),
            slow_network,
            context.platform.clone(),
            context.broadcast.clone(),
            policy,
        );

        let err = context.auth.unlock(Some("1234")).await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout), "got {:?}", err);
        assert_eq!(context.store.unlock_retry_count(), 0);
    }

    #[tokio::test]
    async fn transport_timeout_counts_when_the_policy_says_so() {
        let mut context = TestContext::with_policy(LockPolicy {
            timeout_consumes_retry: true,
            ..LockPolicy::default()
        });
        context.sign_in();

        context
            .auth
            .create_lock(LockMode::PinOrSession, "1234", 300, None)
            .await
            .unwrap();

        let mut slow_network = context.network.clone();
        slow_network.unlock_delay = Some(Duration::from_millis(100));
        context.auth = AuthOrchestrator::new(
            context.store.clone(),
            slow_network,
            context.platform.clone(),
            context.broadcast.clone(),
            LockPolicy {
                unlock_timeout: Duration::from_millis(10),
                timeout_consumes_retry: true,
                ..LockPolicy::default()
            },
        );

        let err = context.auth.unlock(Some("1234")).await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout), "got {:?}", err);
        assert_eq!(context.store.unlock_retry_count(), 1);
    }

    #[tokio::test]
    async fn persisted_session_survives_a_restart() {
        let context = TestContext::new();
        context.sign_in();

        context
            .auth
            .create_lock(LockMode::Password, "master-password", 600, None)
            .await
            .unwrap();

        let persisted = context.store.persisted_session().unwrap();
        let raw = serde_json::to_string(&persisted).unwrap();
        assert!(context.store.valid_persisted_session(&raw));
        assert!(!raw.contains("key-password"));

        // Blank the in-memory fields, as a process restart would.
        context.store.apply(SessionUpdate {
            key_password: Some(String::new()),
            ..Default::default()
        });
        context.store.set_offline_kd(None);

        let resumed = context.auth.resume_session(&raw).await.unwrap();
        assert_eq!(resumed.key_password, "key-password");
        assert_eq!(resumed.lock_mode, LockMode::Password);
        // Raw key material is never restored by resumption alone.
        assert!(resumed.offline_kd.is_none());

        // The password mechanism recovers it from the user secret.
        let kd = context.auth.unlock(Some("master-password")).await.unwrap();
        assert_eq!(context.store.offline_kd().as_deref(), Some(kd.as_str()));
    }

    #[tokio::test]
    async fn consume_fork_hydrates_and_persists() {
        let context = TestContext::new();
        *context.network.fork_session.lock().unwrap() = Some(Session {
            uid: "uid-fork".to_string(),
            user_id: "user-fork".to_string(),
            key_password: "forked-kp".to_string(),
            cookies: true,
            ..Default::default()
        });

        let session = context.auth.consume_fork("selector-1").await.unwrap();
        assert_eq!(session.uid, "uid-fork");
        assert!(context.store.persisted_session().is_some());
    }

    #[tokio::test]
    async fn sign_out_destroys_everything() {
        let context = TestContext::new();
        context.sign_in();
        context
            .auth
            .create_lock(LockMode::Password, "master-password", 600, None)
            .await
            .unwrap();

        context.auth.sign_out().await;

        assert!(!context.store.has_session(None));
        assert!(context.store.persisted_session().is_none());
        assert!(context.broadcast.events().contains(&LockEvent::SignedOut));
    }
}
