//! Credential session & lock core.
//!
//! Holds an authenticated session's secret material in memory, decides
//! whether the application is locked, and arbitrates among mutually
//! exclusive unlock mechanisms (master password, device biometrics,
//! PIN/session token), each with its own security properties and
//! failure policy.
//!
//! The crate is a library consumed by a host application: rendering,
//! transports, platform prompt UI and state containers live behind the
//! capability traits in [`capabilities`].

pub mod auth_store;
pub mod capabilities;
pub mod config;
pub mod crypto;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod persist;
pub mod session;
pub mod store;
mod time;

pub use auth_store::AuthStore;
pub use capabilities::{LockBroadcast, LockEvent, NetworkVerifier, NoopBroadcast, PlatformKeys};
pub use config::LockPolicy;
pub use error::{AuthError, Result};
pub use lock::{BeforeCreateHook, LockAdapter, LockContext, LockStatus};
pub use orchestrator::{AuthOrchestrator, LockOptions};
pub use session::{LockMode, PersistedSession, Session, SessionUpdate};
pub use store::{KvStore, MemoryStore};
