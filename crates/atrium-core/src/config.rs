// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::journey::JourneyConfig;
use crate::tenancy::TokenVerifier;
use crate::workflow::TimeoutSchedulerConfig;

/// Atrium Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Tenant slug used for `localhost` requests
    pub default_tenant: String,
    /// Shared HMAC secret for bearer tokens
    pub token_secret: Option<String>,
    /// Lifetime of issued bearer tokens
    pub token_ttl: Duration,
    /// Maximum accepted attachment size in bytes
    pub max_upload_bytes: i64,
    /// Interval between workflow timeout scans
    pub timeout_tick: Duration,
    /// Maximum approvals handled per timeout scan
    pub timeout_batch_size: i64,
    /// How often an engine recomputes a change after losing a write race
    pub commit_attempts: u32,
    /// Curriculum file activated globally at start-up
    pub playbook_path: Option<PathBuf>,
    /// Entity type used when node submissions start an approval workflow
    pub review_entity_type: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `ATRIUM_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `ATRIUM_DEFAULT_TENANT`: slug for localhost requests (default: default)
    /// - `ATRIUM_TOKEN_SECRET`: HMAC secret for bearer tokens (no default)
    /// - `ATRIUM_TOKEN_TTL_SECS`: token lifetime (default: 86400)
    /// - `ATRIUM_MAX_UPLOAD_MB`: attachment size limit (default: 25)
    /// - `ATRIUM_TIMEOUT_TICK_SECS`: timeout scan interval (default: 60)
    /// - `ATRIUM_TIMEOUT_BATCH_SIZE`: approvals per scan (default: 100)
    /// - `ATRIUM_COMMIT_ATTEMPTS`: write-race retries (default: 3)
    /// - `ATRIUM_PLAYBOOK_PATH`: curriculum file to activate (no default)
    /// - `ATRIUM_REVIEW_ENTITY_TYPE`: workflow entity type for reviews (default: journey_node)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("ATRIUM_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("ATRIUM_DATABASE_URL"))?;

        let default_tenant =
            std::env::var("ATRIUM_DEFAULT_TENANT").unwrap_or_else(|_| "default".to_string());
        if default_tenant.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ATRIUM_DEFAULT_TENANT",
                "must not be empty",
            ));
        }

        let token_secret = std::env::var("ATRIUM_TOKEN_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let token_ttl_secs: u64 = parse_var(
            "ATRIUM_TOKEN_TTL_SECS",
            "86400",
            "must be a positive integer",
        )?;

        let max_upload_mb: i64 =
            parse_var("ATRIUM_MAX_UPLOAD_MB", "25", "must be a positive integer")?;
        let max_upload_bytes = Some(max_upload_mb)
            .filter(|mb| *mb > 0)
            .and_then(|mb| mb.checked_mul(1024 * 1024))
            .ok_or(ConfigError::Invalid(
                "ATRIUM_MAX_UPLOAD_MB",
                "must be a positive integer that fits in bytes",
            ))?;

        let tick_secs: u64 = parse_var(
            "ATRIUM_TIMEOUT_TICK_SECS",
            "60",
            "must be a positive integer",
        )?;
        if tick_secs == 0 {
            return Err(ConfigError::Invalid(
                "ATRIUM_TIMEOUT_TICK_SECS",
                "must be a positive integer",
            ));
        }

        let timeout_batch_size: i64 = parse_var(
            "ATRIUM_TIMEOUT_BATCH_SIZE",
            "100",
            "must be a positive integer",
        )?;
        if timeout_batch_size <= 0 {
            return Err(ConfigError::Invalid(
                "ATRIUM_TIMEOUT_BATCH_SIZE",
                "must be a positive integer",
            ));
        }

        let commit_attempts: u32 = parse_var(
            "ATRIUM_COMMIT_ATTEMPTS",
            "3",
            "must be a positive integer",
        )?;
        if commit_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ATRIUM_COMMIT_ATTEMPTS",
                "must be a positive integer",
            ));
        }

        let playbook_path = std::env::var("ATRIUM_PLAYBOOK_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let review_entity_type = std::env::var("ATRIUM_REVIEW_ENTITY_TYPE")
            .unwrap_or_else(|_| "journey_node".to_string());

        Ok(Self {
            database_url,
            default_tenant,
            token_secret,
            token_ttl: Duration::from_secs(token_ttl_secs),
            max_upload_bytes,
            timeout_tick: Duration::from_secs(tick_secs),
            timeout_batch_size,
            commit_attempts,
            playbook_path,
            review_entity_type,
        })
    }

    /// Journey engine settings derived from this configuration.
    pub fn journey(&self) -> JourneyConfig {
        JourneyConfig {
            max_upload_bytes: self.max_upload_bytes,
            commit_attempts: self.commit_attempts,
            review_entity_type: self.review_entity_type.clone(),
        }
    }

    /// Timeout scheduler settings derived from this configuration.
    pub fn timeout_scheduler(&self) -> TimeoutSchedulerConfig {
        TimeoutSchedulerConfig {
            poll_interval: self.timeout_tick,
            batch_size: self.timeout_batch_size,
        }
    }

    /// Build the bearer token verifier. Fails when no secret is configured.
    pub fn token_verifier(&self) -> Result<TokenVerifier, ConfigError> {
        let secret = self
            .token_secret
            .as_deref()
            .ok_or(ConfigError::Missing("ATRIUM_TOKEN_SECRET"))?;
        Ok(TokenVerifier::new(secret.as_bytes(), self.token_ttl))
    }
}

fn parse_var<T: FromStr>(
    key: &'static str,
    default: &str,
    reason: &'static str,
) -> Result<T, ConfigError> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(key, reason))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "ATRIUM_DATABASE_URL",
        "ATRIUM_DEFAULT_TENANT",
        "ATRIUM_TOKEN_SECRET",
        "ATRIUM_TOKEN_TTL_SECS",
        "ATRIUM_MAX_UPLOAD_MB",
        "ATRIUM_TIMEOUT_TICK_SECS",
        "ATRIUM_TIMEOUT_BATCH_SIZE",
        "ATRIUM_COMMIT_ATTEMPTS",
        "ATRIUM_PLAYBOOK_PATH",
        "ATRIUM_REVIEW_ENTITY_TYPE",
    ];

    /// Sets env vars for a test and restores them on drop
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ATRIUM_DATABASE_URL", "sqlite::memory:");

        let config = Config::from_env().expect("config should load");
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.default_tenant, "default");
        assert!(config.token_secret.is_none());
        assert_eq!(config.token_ttl, Duration::from_secs(86400));
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.timeout_tick, Duration::from_secs(60));
        assert_eq!(config.timeout_batch_size, 100);
        assert_eq!(config.commit_attempts, 3);
        assert!(config.playbook_path.is_none());
        assert_eq!(config.review_entity_type, "journey_node");
    }

    #[test]
    fn test_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ATRIUM_DATABASE_URL", "sqlite:atrium.db");
        guard.set("ATRIUM_DEFAULT_TENANT", "kaznmu");
        guard.set("ATRIUM_TOKEN_SECRET", "s3cret");
        guard.set("ATRIUM_MAX_UPLOAD_MB", "5");
        guard.set("ATRIUM_TIMEOUT_TICK_SECS", "15");
        guard.set("ATRIUM_PLAYBOOK_PATH", "/etc/atrium/playbook.json");

        let config = Config::from_env().expect("config should load");
        assert_eq!(config.default_tenant, "kaznmu");
        assert_eq!(config.token_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout_tick, Duration::from_secs(15));
        assert_eq!(
            config.playbook_path,
            Some(PathBuf::from("/etc/atrium/playbook.json"))
        );
        assert_eq!(config.journey().max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(
            config.timeout_scheduler().poll_interval,
            Duration::from_secs(15)
        );
        assert!(config.token_verifier().is_ok());
    }

    #[test]
    fn test_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ATRIUM_DATABASE_URL")));
    }

    #[test]
    fn test_invalid_numbers() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ATRIUM_DATABASE_URL", "sqlite::memory:");
        guard.set("ATRIUM_TIMEOUT_TICK_SECS", "soon");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("ATRIUM_TIMEOUT_TICK_SECS", _)
        ));

        guard.set("ATRIUM_TIMEOUT_TICK_SECS", "0");
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn test_out_of_range_limits() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ATRIUM_DATABASE_URL", "sqlite::memory:");

        for batch in ["0", "-1"] {
            guard.set("ATRIUM_TIMEOUT_BATCH_SIZE", batch);
            assert!(matches!(
                Config::from_env().unwrap_err(),
                ConfigError::Invalid("ATRIUM_TIMEOUT_BATCH_SIZE", _)
            ));
        }
        guard.set("ATRIUM_TIMEOUT_BATCH_SIZE", "25");
        assert_eq!(Config::from_env().unwrap().timeout_batch_size, 25);

        guard.set("ATRIUM_MAX_UPLOAD_MB", &i64::MAX.to_string());
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("ATRIUM_MAX_UPLOAD_MB", _)
        ));
        guard.set("ATRIUM_MAX_UPLOAD_MB", "0");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("ATRIUM_MAX_UPLOAD_MB", _)
        ));
    }

    #[test]
    fn test_token_verifier_requires_secret() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ATRIUM_DATABASE_URL", "sqlite::memory:");

        let config = Config::from_env().expect("config should load");
        assert!(matches!(
            config.token_verifier(),
            Err(ConfigError::Missing("ATRIUM_TOKEN_SECRET"))
        ));
    }
}
