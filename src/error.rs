use thiserror::Error;

/// The lock core's error type.
///
/// Callers branch on the variant, never on message strings: a wrong
/// secret, a corrupted mechanism and an exhausted retry budget must all
/// be distinguishable so the host can explain the outcome correctly.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The supplied secret failed verification.
    #[error("Invalid secret")]
    WrongSecret,

    /// Lock material decrypted to something structurally invalid.
    ///
    /// Retrying the same mechanism can never succeed; by the time this
    /// surfaces the session has been downgraded to a password lock.
    #[error("Lock material corrupted")]
    Corrupted,

    /// A remote or interactive step exceeded its deadline.
    #[error("Operation timed out")]
    Timeout,

    /// The unlock retry ceiling was reached and the mechanism was
    /// downgraded to a password lock.
    #[error("Too many unlock attempts")]
    TooManyRetries,

    /// An infrastructure failure with no user-attributable cause
    /// (missing platform secret, transport unavailable).
    #[error("Silent failure: {0}")]
    Silent(String),

    /// A precondition violation: the mechanism was used before being
    /// configured. Always a programming error, never swallowed.
    #[error("Missing lock configuration: {0}")]
    MissingConfig(&'static str),

    /// An encryption or key-derivation error.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A key-value store I/O error.
    #[error("Store error: {0}")]
    Store(String),

    /// An unrecoverable internal error.
    #[error("Fatal: {0}")]
    Fatal(String),
}

/// A `Result` type that uses `AuthError` as the error type.
pub type Result<T> = std::result::Result<T, AuthError>;
