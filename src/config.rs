use std::time::Duration;

/// The maximum number of consecutive failed unlock attempts before the
/// active mechanism is torn down and the session falls back to a
/// password lock.
pub const RETRY_CEILING: u32 = 3;

/// Hard deadline for remote/interactive unlock steps (platform prompts,
/// session-lock round trips).
pub const UNLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard deadline for pulling an authentication fork.
pub const FORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Security policy knobs for the lock core.
#[derive(Clone, Debug)]
pub struct LockPolicy {
    /// Failed unlock attempts allowed before forced password fallback.
    pub retry_ceiling: u32,
    /// Whether a pure transport timeout consumes a retry slot.
    ///
    /// A missing platform secret always counts (the user walked away
    /// from the prompt); a transport that never answered is exempt by
    /// default since the user never got to be wrong.
    pub timeout_consumes_retry: bool,
    /// Deadline for remote/interactive unlock steps.
    pub unlock_timeout: Duration,
    /// Deadline for pulling an authentication fork.
    pub fork_timeout: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            retry_ceiling: RETRY_CEILING,
            timeout_consumes_retry: false,
            unlock_timeout: UNLOCK_TIMEOUT,
            fork_timeout: FORK_TIMEOUT,
        }
    }
}
