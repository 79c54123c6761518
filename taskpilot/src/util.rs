//! Small shared helpers.

/// Current wall-clock time as unix seconds.
///
/// Returns 0.0 if the system clock is before the epoch.
#[must_use]
pub fn now_unix_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
