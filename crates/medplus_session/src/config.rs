//! Runtime configuration for the session layer.

use crate::role::Role;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "MEDPLUS_HOME";
/// Settle delay after a role switch, in milliseconds.
pub const ROLE_SETTLE_ENV: &str = "MEDPLUS_ROLE_SETTLE_MS";
/// Optional profile lookup timeout, in milliseconds. Unset or 0 disables it.
pub const SYNC_TIMEOUT_ENV: &str = "MEDPLUS_SYNC_TIMEOUT_MS";

/// Storage key of the persisted active role.
pub const ACTIVE_ROLE_KEY: &str = "activeRole";
/// Storage key of the persisted session.
pub const SESSION_KEY: &str = "session";
/// Storage key of the last visible route, kept by the CLI between runs.
pub const LAST_ROUTE_KEY: &str = "lastRoute";

const DEFAULT_ROLE_SETTLE: Duration = Duration::from_millis(100);

/// Session layer configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Root of all local state (`store/`, `profiles.json`, `logs/`).
    pub home: PathBuf,
    /// Key the active role is persisted under.
    pub role_key: String,
    /// Role used after logout and for malformed remote values.
    pub default_role: Role,
    /// Wait applied by `set_active_role_and_wait`.
    pub role_settle: Duration,
    /// Upper bound on a profile lookup. `None` waits indefinitely.
    pub sync_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Defaults rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            role_key: ACTIVE_ROLE_KEY.to_string(),
            default_role: Role::DEFAULT,
            role_settle: DEFAULT_ROLE_SETTLE,
            sync_timeout: None,
        }
    }

    /// Defaults overlaid with `MEDPLUS_*` environment variables.
    pub fn from_env() -> Self {
        let home = std::env::var(HOME_ENV)
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".medplus")))
            .unwrap_or_else(|| PathBuf::from(".medplus"));
        let mut config = Self::with_home(home);

        if let Some(ms) = env_millis(ROLE_SETTLE_ENV) {
            config.role_settle = Duration::from_millis(ms);
        }
        config.sync_timeout = env_millis(SYNC_TIMEOUT_ENV)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        config
    }

    /// Directory of the key/value store.
    pub fn store_dir(&self) -> PathBuf {
        self.home.join("store")
    }

    /// Path of the local `profiles` table.
    pub fn profiles_path(&self) -> PathBuf {
        self.home.join("profiles.json")
    }

    /// Directory for log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }
}

fn env_millis(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a millisecond count", name, raw);
            None
        }
    }
}
