//! Environment-driven configuration for the IAM core.
//!
//! Mirrors the `Config::from_env` convention used across the rest of the
//! codebase this core is extracted from: a struct with sensible defaults,
//! overridden field-by-field from environment variables, with a `validate`
//! pass before use.

use std::env;
use std::time::Duration;

/// Runtime configuration for bootstrap and the migration-election loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// When set, the migration-election loop (§4.5 step 2) is skipped
    /// entirely. Controlled by `IAM_CORE_READ_ONLY`.
    pub read_only: bool,

    /// Initial timeout for the distributed migration lock, in milliseconds.
    /// Controlled by `IAM_CORE_LOCK_INITIAL_TIMEOUT_MS`. Default: 5000.
    pub lock_initial_timeout_ms: u64,

    /// Timeout used on lock re-acquisition attempts after the first,
    /// in milliseconds. Controlled by `IAM_CORE_LOCK_RESET_TIMEOUT_MS`.
    /// Default: 3000.
    pub lock_reset_timeout_ms: u64,

    /// `tracing_subscriber::EnvFilter` directive string for the ambient
    /// logging stack. Controlled by `IAM_CORE_LOG_LEVEL`. Default: "info".
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_only: false,
            lock_initial_timeout_ms: 5_000,
            lock_reset_timeout_ms: 3_000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(read_only) = env::var("IAM_CORE_READ_ONLY") {
            config.read_only = !read_only.is_empty() && read_only.to_lowercase() != "false";
        }

        if let Ok(ms) = env::var("IAM_CORE_LOCK_INITIAL_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.lock_initial_timeout_ms = ms;
            }
        }

        if let Ok(ms) = env::var("IAM_CORE_LOCK_RESET_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.lock_reset_timeout_ms = ms;
            }
        }

        if let Ok(level) = env::var("IAM_CORE_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate the configuration; returns a human-readable message on the
    /// first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_initial_timeout_ms == 0 {
            return Err("lock_initial_timeout_ms cannot be 0".to_string());
        }
        if self.lock_reset_timeout_ms == 0 {
            return Err("lock_reset_timeout_ms cannot be 0".to_string());
        }
        if self.log_level.is_empty() {
            return Err("log_level cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn lock_initial_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_initial_timeout_ms)
    }

    pub fn lock_reset_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_reset_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.read_only);
        assert_eq!(config.lock_initial_timeout_ms, 5_000);
    }

    #[test]
    fn from_env_overrides_defaults() {
        // SAFETY: test-only mutation of process env, serialized by the test harness.
        unsafe {
            env::set_var("IAM_CORE_READ_ONLY", "true");
            env::set_var("IAM_CORE_LOCK_INITIAL_TIMEOUT_MS", "1500");
        }

        let config = Config::from_env();
        assert!(config.read_only);
        assert_eq!(config.lock_initial_timeout_ms, 1500);

        unsafe {
            env::remove_var("IAM_CORE_READ_ONLY");
            env::remove_var("IAM_CORE_LOCK_INITIAL_TIMEOUT_MS");
        }
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.lock_initial_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
