use chrono::Utc;

/// Returns the current epoch time in seconds.
pub fn epoch() -> i64 {
    Utc::now().timestamp()
}
