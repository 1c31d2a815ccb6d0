//! Environment helpers: one-time dotenv loading and typed getters.
//! Every getter calls `init_env()` first, so callers never need to.
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use tracing::{info, warn};

static INIT: Once = Once::new();

/// Load `.env` exactly once. Falls back to the manifest directory so
/// `cargo run` from elsewhere in the tree still picks it up.
pub fn init_env() {
    INIT.call_once(|| {
        if dotenv::dotenv().is_ok() {
            return;
        }
        let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
        let _ = dotenv::from_filename(candidate);
    });
}

/// Common bootstrap for the CLI: load env once and note where state lives.
pub fn bootstrap_cli(bin_name: &str) {
    init_env();
    match env_opt("SNAP_PENDING_DIR") {
        Some(dir) => info!(target = "bootstrap", bin = bin_name, pending_dir = %dir, "pending dir from env"),
        None => info!(
            target = "bootstrap",
            bin = bin_name,
            "SNAP_PENDING_DIR not set; using ./users_to_scrape"
        ),
    }
}

/// Optional env var (None if unset or blank).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Parsed value with default fallback. Unparseable values are reported and
/// replaced by the default rather than aborting startup.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    let Some(raw) = env_opt(key) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_key = key, raw_value = %raw, fallback = ?default, "invalid env value; using default");
            default
        }
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(raw) => matches!(
            raw.to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        None => default,
    }
}

/// Fractional seconds, e.g. `SNAP_REQUEST_DELAY_SECS=2.5`.
pub fn env_secs(key: &str, default: Duration) -> Duration {
    let secs = env_parse::<f64>(key, default.as_secs_f64());
    if secs.is_finite() && secs >= 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        warn!(env_key = key, secs, "negative or non-finite duration; using default");
        default
    }
}

pub fn env_path(key: &str, default: &str) -> PathBuf {
    env_opt(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}
