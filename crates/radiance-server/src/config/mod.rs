//! Configuration loading and resolution.
//!
//! Every setting follows the same order: explicit flag, then environment,
//! then a built-in default.

use std::path::PathBuf;

use chrono::Duration;

use radiance::loop_state::DEFAULT_STALE_AFTER_MINS;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3100";

/// Resolve the database file path.
pub fn resolve_db_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var("RADIANCE_DB") {
        return PathBuf::from(env_path);
    }

    let cwd_db = PathBuf::from(".radiance/radiance.db");
    if cwd_db.exists() {
        return cwd_db;
    }

    resolve_default_db_path()
}

fn resolve_default_db_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(format!("{home}/.radiance/radiance.db"))
}

/// Resolve the listen address.
pub fn resolve_addr(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var("RADIANCE_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string())
}

/// Resolve the bearer token. An empty value disables auth.
pub fn resolve_token(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var("RADIANCE_TOKEN").ok())
        .filter(|t| !t.is_empty())
}

/// How long after the last completed phase the loop is reported stale.
pub fn resolve_stale_after() -> Duration {
    let mins = std::env::var("RADIANCE_STALE_AFTER_MINS")
        .ok()
        .and_then(|v| parse_positive(&v, "RADIANCE_STALE_AFTER_MINS"))
        .unwrap_or(DEFAULT_STALE_AFTER_MINS);
    Duration::minutes(mins)
}

/// Window within which a repeat alert for the same entity is suppressed.
/// Unset means every run alerts independently.
pub fn resolve_dedup_window() -> Option<Duration> {
    std::env::var("RADIANCE_DEDUP_WINDOW_HOURS")
        .ok()
        .and_then(|v| parse_positive(&v, "RADIANCE_DEDUP_WINDOW_HOURS"))
        .map(Duration::hours)
}

fn parse_positive(raw: &str, var: &str) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(value = raw, "ignoring invalid {var}");
            None
        }
    }
}
