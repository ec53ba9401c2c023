use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::crypto::offline::OfflineConfig;
use crate::session::{
    decode_user_data, encode_user_data, LockMode, PersistedSession, Session, SessionUpdate,
    SESSION_VERSION,
};
use crate::store::codec::FieldKey;
use crate::store::KvStore;

/// The typed field table: every persisted field bound to its key and
/// codec. Token, password and key material fields go through the
/// obfuscating codec so the store never holds their structured
/// plaintext.
mod fields {
    use super::{FieldKey, LockMode, OfflineConfig, PersistedSession};

    pub const UID: FieldKey<String> = FieldKey::plain("auth:uid");
    pub const USER_ID: FieldKey<String> = FieldKey::plain("auth:user_id");
    pub const LOCAL_ID: FieldKey<u32> = FieldKey::plain("auth:local_id");
    pub const PERSISTENT: FieldKey<bool> = FieldKey::plain("auth:persistent");

    pub const ACCESS_TOKEN: FieldKey<String> = FieldKey::obfuscated("auth:access_token");
    pub const REFRESH_TOKEN: FieldKey<String> = FieldKey::obfuscated("auth:refresh_token");
    pub const REFRESH_TIME: FieldKey<i64> = FieldKey::plain("auth:refresh_time");
    pub const COOKIE_AUTH: FieldKey<bool> = FieldKey::plain("auth:cookie_auth");

    pub const KEY_PASSWORD: FieldKey<String> = FieldKey::obfuscated("auth:key_password");

    pub const LOCK_MODE: FieldKey<LockMode> = FieldKey::plain("auth:lock_mode");
    pub const LOCK_STATE: FieldKey<bool> = FieldKey::plain("auth:lock_state");
    pub const LOCK_TOKEN: FieldKey<String> = FieldKey::obfuscated("auth:lock_token");
    pub const LOCK_TTL: FieldKey<u32> = FieldKey::plain("auth:lock_ttl");
    pub const LOCK_EXTEND_TIME: FieldKey<i64> = FieldKey::plain("auth:lock_extend_time");
    pub const LOCK_VERSION: FieldKey<u64> = FieldKey::plain("auth:lock_version");

    pub const OFFLINE_CONFIG: FieldKey<OfflineConfig> = FieldKey::plain("auth:offline_config");
    pub const OFFLINE_KD: FieldKey<String> = FieldKey::obfuscated("auth:offline_kd");
    pub const OFFLINE_VERIFIER: FieldKey<String> = FieldKey::obfuscated("auth:offline_verifier");
    pub const ENCRYPTED_OFFLINE_KD: FieldKey<String> =
        FieldKey::plain("auth:encrypted_offline_kd");

    pub const UNLOCK_RETRY_COUNT: FieldKey<u32> = FieldKey::plain("auth:unlock_retry_count");
    pub const TWO_PASSWORD_MODE: FieldKey<bool> = FieldKey::plain("auth:two_password_mode");
    pub const EXTRA_PASSWORD: FieldKey<bool> = FieldKey::plain("auth:extra_password");
    pub const LAST_USED_AT: FieldKey<i64> = FieldKey::plain("auth:last_used_at");
    pub const SSO: FieldKey<bool> = FieldKey::plain("auth:sso");
    pub const PAYLOAD_VERSION: FieldKey<u32> = FieldKey::plain("auth:payload_version");

    pub const USER_EMAIL: FieldKey<String> = FieldKey::obfuscated("auth:user_email");
    pub const USER_DISPLAY_NAME: FieldKey<String> =
        FieldKey::obfuscated("auth:user_display_name");

    pub const CLIENT_KEY: FieldKey<String> = FieldKey::obfuscated("auth:client_key");
    pub const PERSISTED_SESSION: FieldKey<PersistedSession> =
        FieldKey::plain("auth:persisted_session");
}

/// Typed, single-owner accessor layer over the key-value store.
///
/// Owns no business logic beyond the validity predicates and the
/// encode/decode of obfuscated fields. The store handle is injected;
/// there is no ambient global instance.
pub struct AuthStore {
    kv: Arc<dyn KvStore>,
}

impl AuthStore {
    /// Creates a new `AuthStore` over an injected key-value store.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn get<T: DeserializeOwned>(&self, field: FieldKey<T>) -> Option<T> {
        let raw = self.kv.get(field.key)?;
        let json = match field.codec {
            crate::store::codec::Codec::Plain => raw,
            crate::store::codec::Codec::Obfuscated => crate::store::codec::deobfuscate(&raw)?,
        };
        sonic_rs::from_str(&json).ok()
    }

    fn set<T: Serialize>(&self, field: FieldKey<T>, value: &T) {
        let json = match sonic_rs::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("❌ Failed to encode store field {}: {}", field.key, e);
                return;
            }
        };

        let stored = match field.codec {
            crate::store::codec::Codec::Plain => json,
            crate::store::codec::Codec::Obfuscated => crate::store::codec::obfuscate(&json),
        };
        self.kv.set(field.key, stored);
    }

    fn set_opt<T: Serialize>(&self, field: FieldKey<T>, value: Option<&T>) {
        match value {
            Some(value) => self.set(field, value),
            None => self.kv.remove(field.key),
        }
    }

    /// Resets all fields to empty (signs out).
    pub fn clear(&self) {
        self.kv.reset();
    }

    // Identity ------------------------------------------------------------

    pub fn uid(&self) -> Option<String> {
        self.get(fields::UID)
    }

    pub fn set_uid(&self, uid: &str) {
        self.set(fields::UID, &uid.to_string());
    }

    pub fn user_id(&self) -> Option<String> {
        self.get(fields::USER_ID)
    }

    pub fn set_user_id(&self, user_id: &str) {
        self.set(fields::USER_ID, &user_id.to_string());
    }

    pub fn local_id(&self) -> Option<u32> {
        self.get(fields::LOCAL_ID)
    }

    pub fn set_local_id(&self, local_id: u32) {
        self.set(fields::LOCAL_ID, &local_id);
    }

    pub fn persistent(&self) -> Option<bool> {
        self.get(fields::PERSISTENT)
    }

    pub fn set_persistent(&self, persistent: bool) {
        self.set(fields::PERSISTENT, &persistent);
    }

    /// Whether a session is present, optionally pinned to a slot.
    pub fn has_session(&self, local_id: Option<u32>) -> bool {
        self.uid().is_some_and(|uid| !uid.is_empty())
            && (local_id.is_none() || self.local_id() == local_id)
    }

    // Network credentials -------------------------------------------------

    pub fn access_token(&self) -> Option<String> {
        self.get(fields::ACCESS_TOKEN)
    }

    pub fn set_access_token(&self, token: &str) {
        self.set(fields::ACCESS_TOKEN, &token.to_string());
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get(fields::REFRESH_TOKEN)
    }

    pub fn set_refresh_token(&self, token: &str) {
        self.set(fields::REFRESH_TOKEN, &token.to_string());
    }

    pub fn refresh_time(&self) -> Option<i64> {
        self.get(fields::REFRESH_TIME)
    }

    pub fn set_refresh_time(&self, time: i64) {
        self.set(fields::REFRESH_TIME, &time);
    }

    pub fn cookie_auth(&self) -> bool {
        self.get(fields::COOKIE_AUTH).unwrap_or(false)
    }

    pub fn set_cookie_auth(&self, enabled: bool) {
        self.set(fields::COOKIE_AUTH, &enabled);
    }

    // Key material --------------------------------------------------------

    pub fn key_password(&self) -> Option<String> {
        self.get(fields::KEY_PASSWORD)
    }

    pub fn set_key_password(&self, password: &str) {
        self.set(fields::KEY_PASSWORD, &password.to_string());
    }

    // Lock configuration --------------------------------------------------

    pub fn lock_mode(&self) -> LockMode {
        self.get(fields::LOCK_MODE).unwrap_or_default()
    }

    pub fn set_lock_mode(&self, mode: LockMode) {
        self.set(fields::LOCK_MODE, &mode);
    }

    pub fn locked(&self) -> bool {
        self.get(fields::LOCK_STATE).unwrap_or(false)
    }

    pub fn set_locked(&self, locked: bool) {
        self.set(fields::LOCK_STATE, &locked);
    }

    pub fn lock_token(&self) -> Option<String> {
        self.get(fields::LOCK_TOKEN)
    }

    pub fn set_lock_token(&self, token: Option<&str>) {
        self.set_opt(fields::LOCK_TOKEN, token.map(|t| t.to_string()).as_ref());
    }

    pub fn lock_ttl(&self) -> Option<u32> {
        self.get(fields::LOCK_TTL)
    }

    pub fn set_lock_ttl(&self, ttl: Option<u32>) {
        self.set_opt(fields::LOCK_TTL, ttl.as_ref());
    }

    pub fn lock_last_extend_time(&self) -> Option<i64> {
        self.get(fields::LOCK_EXTEND_TIME)
    }

    pub fn set_lock_last_extend_time(&self, time: Option<i64>) {
        self.set_opt(fields::LOCK_EXTEND_TIME, time.as_ref());
    }

    /// Monotonic counter bumped on every lock transition. An unlock
    /// commit re-validates it to detect an intervening lock.
    pub fn lock_version(&self) -> u64 {
        self.get(fields::LOCK_VERSION).unwrap_or(0)
    }

    /// Bumps and returns the lock transition version.
    pub fn bump_lock_version(&self) -> u64 {
        let next = self.lock_version() + 1;
        self.set(fields::LOCK_VERSION, &next);
        next
    }

    pub fn unlock_retry_count(&self) -> u32 {
        self.get(fields::UNLOCK_RETRY_COUNT).unwrap_or(0)
    }

    pub fn set_unlock_retry_count(&self, count: u32) {
        self.set(fields::UNLOCK_RETRY_COUNT, &count);
    }

    // Offline capability --------------------------------------------------

    pub fn offline_config(&self) -> Option<OfflineConfig> {
        self.get(fields::OFFLINE_CONFIG)
    }

    pub fn set_offline_config(&self, config: Option<&OfflineConfig>) {
        self.set_opt(fields::OFFLINE_CONFIG, config);
    }

    pub fn offline_kd(&self) -> Option<String> {
        self.get(fields::OFFLINE_KD)
    }

    pub fn set_offline_kd(&self, kd: Option<&str>) {
        self.set_opt(fields::OFFLINE_KD, kd.map(|k| k.to_string()).as_ref());
    }

    pub fn offline_verifier(&self) -> Option<String> {
        self.get(fields::OFFLINE_VERIFIER)
    }

    pub fn set_offline_verifier(&self, verifier: Option<&str>) {
        self.set_opt(
            fields::OFFLINE_VERIFIER,
            verifier.map(|v| v.to_string()).as_ref(),
        );
    }

    pub fn encrypted_offline_kd(&self) -> Option<String> {
        self.get(fields::ENCRYPTED_OFFLINE_KD)
    }

    pub fn set_encrypted_offline_kd(&self, encrypted: Option<&str>) {
        self.set_opt(
            fields::ENCRYPTED_OFFLINE_KD,
            encrypted.map(|e| e.to_string()).as_ref(),
        );
    }

    /// Whether offline verification is fully provisioned: config,
    /// derived key material and verifier all present.
    pub fn has_offline_password(&self) -> bool {
        self.offline_config().is_some()
            && self.offline_kd().is_some()
            && self.offline_verifier().is_some()
    }

    // Metadata ------------------------------------------------------------

    pub fn two_password_mode(&self) -> bool {
        self.get(fields::TWO_PASSWORD_MODE).unwrap_or(false)
    }

    pub fn set_two_password_mode(&self, enabled: bool) {
        self.set(fields::TWO_PASSWORD_MODE, &enabled);
    }

    pub fn extra_password(&self) -> bool {
        self.get(fields::EXTRA_PASSWORD).unwrap_or(false)
    }

    pub fn set_extra_password(&self, enabled: bool) {
        self.set(fields::EXTRA_PASSWORD, &enabled);
    }

    pub fn last_used_at(&self) -> i64 {
        self.get(fields::LAST_USED_AT).unwrap_or(0)
    }

    pub fn set_last_used_at(&self, at: i64) {
        self.set(fields::LAST_USED_AT, &at);
    }

    pub fn sso(&self) -> bool {
        self.get(fields::SSO).unwrap_or(false)
    }

    pub fn set_sso(&self, sso: bool) {
        self.set(fields::SSO, &sso);
    }

    pub fn payload_version(&self) -> u32 {
        self.get(fields::PAYLOAD_VERSION).unwrap_or(SESSION_VERSION)
    }

    pub fn set_payload_version(&self, version: u32) {
        self.set(fields::PAYLOAD_VERSION, &version);
    }

    pub fn user_email(&self) -> Option<String> {
        self.get(fields::USER_EMAIL)
    }

    pub fn set_user_email(&self, email: &str) {
        self.set(fields::USER_EMAIL, &email.to_string());
    }

    pub fn user_display_name(&self) -> Option<String> {
        self.get(fields::USER_DISPLAY_NAME)
    }

    pub fn set_user_display_name(&self, name: &str) {
        self.set(fields::USER_DISPLAY_NAME, &name.to_string());
    }

    /// Assembles the obfuscated `user_data` value from the stored
    /// email and display name.
    pub fn user_data(&self) -> Option<String> {
        let email = self.user_email();
        let name = self.user_display_name();
        if email.is_none() && name.is_none() {
            return None;
        }
        Some(encode_user_data(
            email.as_deref().unwrap_or(""),
            name.as_deref().unwrap_or(""),
        ))
    }

    /// Splits a `user_data` value back into its stored fields.
    pub fn set_user_data(&self, user_data: &str) {
        let (email, name) = decode_user_data(user_data);
        self.set_user_email(&email);
        self.set_user_display_name(&name);
    }

    // Persistence support -------------------------------------------------

    pub fn client_key(&self) -> Option<String> {
        self.get(fields::CLIENT_KEY)
    }

    pub fn set_client_key(&self, key: &str) {
        self.set(fields::CLIENT_KEY, &key.to_string());
    }

    pub fn persisted_session(&self) -> Option<PersistedSession> {
        self.get(fields::PERSISTED_SESSION)
    }

    pub fn set_persisted_session(&self, persisted: &PersistedSession) {
        self.set(fields::PERSISTED_SESSION, persisted);
    }

    pub fn remove_persisted_session(&self) {
        self.kv.remove(fields::PERSISTED_SESSION.key);
    }

    // Snapshots -----------------------------------------------------------

    /// Assembles a full session snapshot from individual fields. No
    /// side effects.
    pub fn session(&self) -> Session {
        Session {
            uid: self.uid().unwrap_or_default(),
            user_id: self.user_id().unwrap_or_default(),
            local_id: self.local_id(),
            persistent: self.persistent(),
            access_token: self.access_token().unwrap_or_default(),
            refresh_token: self.refresh_token().unwrap_or_default(),
            refresh_time: self.refresh_time(),
            cookies: self.cookie_auth(),
            key_password: self.key_password().unwrap_or_default(),
            lock_mode: self.lock_mode(),
            lock_ttl: self.lock_ttl(),
            lock_last_extend_time: self.lock_last_extend_time(),
            session_lock_token: self.lock_token(),
            unlock_retry_count: self.unlock_retry_count(),
            offline_config: self.offline_config(),
            offline_kd: self.offline_kd(),
            offline_verifier: self.offline_verifier(),
            encrypted_offline_kd: self.encrypted_offline_kd(),
            two_password_mode: self.two_password_mode(),
            extra_password: self.extra_password(),
            last_used_at: self.last_used_at(),
            sso: self.sso(),
            payload_version: self.payload_version(),
            user_data: self.user_data(),
        }
    }

    /// Applies only the fields present in the update. `Some(0)` and
    /// `Some(false)` are applied; absent fields are left untouched.
    pub fn apply(&self, update: SessionUpdate) {
        if let Some(uid) = update.uid {
            self.set_uid(&uid);
        }
        if let Some(user_id) = update.user_id {
            self.set_user_id(&user_id);
        }
        if let Some(local_id) = update.local_id {
            self.set_local_id(local_id);
        }
        if let Some(persistent) = update.persistent {
            self.set_persistent(persistent);
        }
        if let Some(token) = update.access_token {
            self.set_access_token(&token);
        }
        if let Some(token) = update.refresh_token {
            self.set_refresh_token(&token);
        }
        if let Some(time) = update.refresh_time {
            self.set_refresh_time(time);
        }
        if let Some(cookies) = update.cookies {
            self.set_cookie_auth(cookies);
        }
        if let Some(password) = update.key_password {
            self.set_key_password(&password);
        }
        if let Some(mode) = update.lock_mode {
            self.set_lock_mode(mode);
        }
        if let Some(ttl) = update.lock_ttl {
            self.set_lock_ttl(Some(ttl));
        }
        if let Some(time) = update.lock_last_extend_time {
            self.set_lock_last_extend_time(Some(time));
        }
        if let Some(token) = update.session_lock_token {
            self.set_lock_token(Some(&token));
        }
        if let Some(count) = update.unlock_retry_count {
            self.set_unlock_retry_count(count);
        }
        if let Some(config) = update.offline_config {
            self.set_offline_config(Some(&config));
        }
        if let Some(kd) = update.offline_kd {
            self.set_offline_kd(Some(&kd));
        }
        if let Some(verifier) = update.offline_verifier {
            self.set_offline_verifier(Some(&verifier));
        }
        if let Some(encrypted) = update.encrypted_offline_kd {
            self.set_encrypted_offline_kd(Some(&encrypted));
        }
        if let Some(enabled) = update.two_password_mode {
            self.set_two_password_mode(enabled);
        }
        if let Some(enabled) = update.extra_password {
            self.set_extra_password(enabled);
        }
        if let Some(at) = update.last_used_at {
            self.set_last_used_at(at);
        }
        if let Some(sso) = update.sso {
            self.set_sso(sso);
        }
        if let Some(version) = update.payload_version {
            self.set_payload_version(version);
        }
        if let Some(user_data) = update.user_data {
            self.set_user_data(&user_data);
        }
    }

    /// Pure predicate: is this set of fields enough to consider the
    /// user authenticated.
    pub fn valid_session(&self, session: &Session) -> bool {
        session.valid()
    }

    /// Pure predicate: is this raw persisted payload well-formed
    /// enough to attempt resumption.
    pub fn valid_persisted_session(&self, raw: &str) -> bool {
        sonic_rs::from_str::<PersistedSession>(raw)
            .map(|persisted| persisted.valid())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn auth_store() -> AuthStore {
        AuthStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn zero_values_are_applied() {
        let store = auth_store();
        store.set_last_used_at(42);
        store.set_unlock_retry_count(2);

        store.apply(SessionUpdate {
            last_used_at: Some(0),
            unlock_retry_count: Some(0),
            ..Default::default()
        });

        assert_eq!(store.last_used_at(), 0);
        assert_eq!(store.unlock_retry_count(), 0);
    }

    #[test]
    fn absent_fields_are_untouched() {
        let store = auth_store();
        store.set_uid("uid-1");
        store.set_key_password("kp");

        store.apply(SessionUpdate {
            user_id: Some("user-1".to_string()),
            ..Default::default()
        });

        assert_eq!(store.uid().as_deref(), Some("uid-1"));
        assert_eq!(store.key_password().as_deref(), Some("kp"));
        assert_eq!(store.user_id().as_deref(), Some("user-1"));
    }

    #[test]
    fn obfuscated_fields_never_rest_in_clear() {
        let kv = Arc::new(MemoryStore::new());
        let store = AuthStore::new(kv.clone());
        store.set_key_password("super-secret");

        let raw = kv.get("auth:key_password").unwrap();
        assert!(!raw.contains("super-secret"));
        assert_eq!(store.key_password().as_deref(), Some("super-secret"));
    }

    #[test]
    fn lock_version_is_monotonic() {
        let store = auth_store();
        assert_eq!(store.lock_version(), 0);
        assert_eq!(store.bump_lock_version(), 1);
        assert_eq!(store.bump_lock_version(), 2);
    }

    #[test]
    fn user_data_splits_into_fields() {
        let store = auth_store();
        store.set_user_data(&encode_user_data("a@b.c", "Ada"));
        assert_eq!(store.user_email().as_deref(), Some("a@b.c"));
        assert_eq!(store.user_display_name().as_deref(), Some("Ada"));
    }

    #[test]
    fn clear_signs_out() {
        let store = auth_store();
        store.set_uid("uid-1");
        store.clear();
        assert!(!store.has_session(None));
    }
}
