use std::time::Duration;

use serde::Serialize;

/// Application-level constants
pub const APP_NAME: &str = "Clinic Autosave";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Clinic forms check for unsaved changes every 30 seconds.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long the terminal harness waits for an unload flush before exiting.
pub const DEFAULT_UNLOAD_GRACE: Duration = Duration::from_secs(2);

const ENV_INTERVAL_MS: &str = "CLINIC_AUTOSAVE_INTERVAL_MS";
const ENV_TIMEOUT_MS: &str = "CLINIC_AUTOSAVE_TIMEOUT_MS";
const ENV_START_DIRTY: &str = "CLINIC_AUTOSAVE_START_DIRTY";
const ENV_UNLOAD_GRACE_MS: &str = "CLINIC_AUTOSAVE_UNLOAD_GRACE_MS";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> String {
    "info,clinic_autosave_lib=debug".to_string()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Save interval must be greater than zero")]
    ZeroInterval,

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Autosave behaviour for one hosting form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutosaveConfig {
    /// Fixed tick cadence. Ticks are not debounced by edits.
    pub save_interval: Duration,
    /// Start in the dirty state so the first tick writes a baseline.
    pub start_dirty: bool,
    /// Optional upper bound on a single Save Sink call.
    /// `None` leaves a hanging sink in `saving` indefinitely.
    pub save_timeout: Option<Duration>,
    /// Best-effort wait for the unload flush in hosts that can wait at all.
    pub unload_grace: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            save_interval: DEFAULT_SAVE_INTERVAL,
            start_dirty: false,
            save_timeout: None,
            unload_grace: DEFAULT_UNLOAD_GRACE,
        }
    }
}

impl AutosaveConfig {
    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout = Some(timeout);
        self
    }

    pub fn with_start_dirty(mut self, start_dirty: bool) -> Self {
        self.start_dirty = start_dirty;
        self
    }

    /// Build a config from `CLINIC_AUTOSAVE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup,
    /// so tests do not have to mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_millis(&lookup, ENV_INTERVAL_MS)? {
            config.save_interval = ms;
        }
        config.save_timeout = parse_millis(&lookup, ENV_TIMEOUT_MS)?;
        if let Some(ms) = parse_millis(&lookup, ENV_UNLOAD_GRACE_MS)? {
            config.unload_grace = ms;
        }
        if let Some(raw) = lookup(ENV_START_DIRTY) {
            config.start_dirty = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: ENV_START_DIRTY,
                        value: raw,
                    })
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.save_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}

fn parse_millis<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}
