//! Environment variable parsing helpers.
//!
//! Generic `env_get<T>` with a default, used by the runtime config layer
//! (`EVD_*` variables) and anywhere else a tunable needs a runtime
//! override.

use std::str::FromStr;

/// Get an environment variable parsed as `T`, or the default.
///
/// Unset and unparseable both fall back to the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get an environment variable as a boolean.
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true; any
/// other set value is false. Unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
