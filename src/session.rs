use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::crypto::offline::OfflineConfig;
use crate::store::codec;

/// The current persisted-session payload version.
pub const SESSION_VERSION: u32 = 1;

/// Which mechanism (if any) currently guards access to the decrypted
/// session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// No lock configured.
    #[default]
    None,
    /// Master-password lock, verified offline against the verifier.
    Password,
    /// Platform-biometrics lock wrapping the offline key material.
    Biometrics,
    /// Short PIN backed by a server-side session lock token.
    PinOrSession,
}

/// The authenticated identity plus everything needed to resume or
/// re-derive trust without a full re-login.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier issued at sign-in.
    pub uid: String,
    /// The account's user identifier.
    pub user_id: String,
    /// Session slot index for multi-account hosts.
    pub local_id: Option<u32>,
    /// Whether this session may be written to durable storage.
    pub persistent: Option<bool>,

    /// Access token; empty when cookie transport carries auth.
    pub access_token: String,
    /// Refresh token; empty when cookie transport carries auth.
    pub refresh_token: String,
    /// Epoch time of the last token refresh.
    pub refresh_time: Option<i64>,
    /// True when the transport itself carries authentication.
    pub cookies: bool,

    /// Decryption key for the user's private key material. A session
    /// is never valid without it.
    pub key_password: String,

    /// The active lock mechanism.
    pub lock_mode: LockMode,
    /// Lock TTL in seconds.
    pub lock_ttl: Option<u32>,
    /// Epoch time the lock TTL was last extended.
    pub lock_last_extend_time: Option<i64>,
    /// Opaque proof issued by the server-side session-lock mechanism.
    pub session_lock_token: Option<String>,
    /// Consecutive failed unlock attempts in the current lock cycle.
    pub unlock_retry_count: u32,

    /// Offline derivation parameters.
    pub offline_config: Option<OfflineConfig>,
    /// Base64 derived key material. Memory-only while unlocked; never
    /// persisted in clear.
    pub offline_kd: Option<String>,
    /// Safe-to-persist verifier artifact.
    pub offline_verifier: Option<String>,
    /// The offline key material wrapped under a mechanism key.
    pub encrypted_offline_kd: Option<String>,

    /// Whether the account uses separate login and mailbox passwords.
    pub two_password_mode: bool,
    /// Whether an extra unlock password is configured.
    pub extra_password: bool,
    /// Epoch time of last activity.
    pub last_used_at: i64,
    /// Whether the session was established through SSO.
    pub sso: bool,
    /// Persisted payload version.
    pub payload_version: u32,
    /// Obfuscated email + display name. Never stored in clear logs.
    pub user_data: Option<String>,
}

impl Session {
    /// Checks whether this set of fields is enough to consider the
    /// user authenticated.
    pub fn valid(&self) -> bool {
        !self.uid.is_empty()
            && !self.user_id.is_empty()
            && !self.key_password.is_empty()
            && (self.offline_config.is_none() || self.offline_kd.is_some())
            && (self.cookies || (!self.access_token.is_empty() && !self.refresh_token.is_empty()))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uid", &self.uid)
            .field("user_id", &self.user_id)
            .field("local_id", &self.local_id)
            .field("lock_mode", &self.lock_mode)
            .field("cookies", &self.cookies)
            .field("key_password", &"<redacted>")
            .field("offline_kd", &self.offline_kd.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// A partial session update. Only fields carrying `Some` are applied;
/// `Some(0)` and `Some(false)` are meaningful values, distinct from
/// absence.
#[derive(Clone, Debug, Default)]
pub struct SessionUpdate {
    pub uid: Option<String>,
    pub user_id: Option<String>,
    pub local_id: Option<u32>,
    pub persistent: Option<bool>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub refresh_time: Option<i64>,
    pub cookies: Option<bool>,
    pub key_password: Option<String>,
    pub lock_mode: Option<LockMode>,
    pub lock_ttl: Option<u32>,
    pub lock_last_extend_time: Option<i64>,
    pub session_lock_token: Option<String>,
    pub unlock_retry_count: Option<u32>,
    pub offline_config: Option<OfflineConfig>,
    pub offline_kd: Option<String>,
    pub offline_verifier: Option<String>,
    pub encrypted_offline_kd: Option<String>,
    pub two_password_mode: Option<bool>,
    pub extra_password: Option<bool>,
    pub last_used_at: Option<i64>,
    pub sso: Option<bool>,
    pub payload_version: Option<u32>,
    pub user_data: Option<String>,
}

impl From<Session> for SessionUpdate {
    fn from(s: Session) -> Self {
        Self {
            uid: Some(s.uid),
            user_id: Some(s.user_id),
            local_id: s.local_id,
            persistent: s.persistent,
            access_token: Some(s.access_token),
            refresh_token: Some(s.refresh_token),
            refresh_time: s.refresh_time,
            cookies: Some(s.cookies),
            key_password: Some(s.key_password),
            lock_mode: Some(s.lock_mode),
            lock_ttl: s.lock_ttl,
            lock_last_extend_time: s.lock_last_extend_time,
            session_lock_token: s.session_lock_token,
            unlock_retry_count: Some(s.unlock_retry_count),
            offline_config: s.offline_config,
            offline_kd: s.offline_kd,
            offline_verifier: s.offline_verifier,
            encrypted_offline_kd: s.encrypted_offline_kd,
            two_password_mode: Some(s.two_password_mode),
            extra_password: Some(s.extra_password),
            last_used_at: Some(s.last_used_at),
            sso: Some(s.sso),
            payload_version: Some(s.payload_version),
            user_data: s.user_data,
        }
    }
}

/// The encrypted-at-rest session envelope.
///
/// `key_password`, `session_lock_token` and `offline_kd` live inside
/// the encrypted `blob`; the clear fields are exactly what is needed
/// to pick the right unlock screen and perform the decrypt-blob
/// network call itself. The retry counter sits outside the blob so
/// cheap counter updates never re-encrypt key material.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSession {
    pub uid: String,
    pub user_id: String,
    /// Base64 AES-GCM ciphertext of the sensitive remainder.
    pub blob: String,
    pub cookies: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub refresh_time: Option<i64>,
    pub local_id: Option<u32>,
    pub persistent: Option<bool>,
    pub lock_mode: LockMode,
    pub lock_ttl: Option<u32>,
    pub lock_last_extend_time: Option<i64>,
    pub unlock_retry_count: u32,
    pub offline_config: Option<OfflineConfig>,
    pub offline_verifier: Option<String>,
    pub encrypted_offline_kd: Option<String>,
    pub two_password_mode: bool,
    pub extra_password: bool,
    pub last_used_at: i64,
    pub sso: bool,
    pub payload_version: u32,
    pub user_data: Option<String>,
}

impl PersistedSession {
    /// Checks whether this envelope is well-formed enough to attempt
    /// resumption. Note it does not require `key_password` in clear:
    /// that lives inside the encrypted blob.
    pub fn valid(&self) -> bool {
        let has_token_pair = self
            .access_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
            && self
                .refresh_token
                .as_deref()
                .is_some_and(|t| !t.is_empty());

        !self.uid.is_empty()
            && !self.user_id.is_empty()
            && !self.blob.is_empty()
            && (self.cookies || has_token_pair)
    }
}

/// Encodes an email and display name into the single obfuscated
/// `user_data` value.
pub fn encode_user_data(email: &str, display_name: &str) -> String {
    let encoded = format!("{}.{}", codec::obfuscate(email), codec::obfuscate(display_name));
    BASE64.encode(encoded)
}

/// Decodes a `user_data` value back into `(email, display_name)`.
/// Lenient: malformed input decodes to empty parts, never errors.
pub fn decode_user_data(user_data: &str) -> (String, String) {
    let decoded = match BASE64
        .decode(user_data)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    {
        Some(decoded) => decoded,
        None => return (String::new(), String::new()),
    };

    match decoded.split_once('.') {
        Some((email, name)) => (
            codec::deobfuscate(email).unwrap_or_default(),
            codec::deobfuscate(name).unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    }
}
