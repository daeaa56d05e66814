use serde::{Deserialize, Serialize};

use crate::error::{Result, TiergateError};
use crate::metering::{FailurePolicy, RateLimitConfig};
use crate::utils::{env_flag, get_env_with_prefix, parse_env_with_prefix};

/// Top-level tiergate configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metering: MeteringConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Quota metering settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MeteringConfig {
    /// Outcome for billable quotas when the counter store is unreachable
    #[serde(default = "default_quota_failure_policy")]
    pub quota_failure_policy: FailurePolicy,
    /// Upper bound on a single counter store call
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            quota_failure_policy: default_quota_failure_policy(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_quota_failure_policy() -> FailurePolicy {
    FailurePolicy::Closed
}

fn default_store_timeout_ms() -> u64 {
    500
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Check settings that serde alone cannot enforce.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(TiergateError::configuration(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.metering.store_timeout_ms == 0 {
            return Err(TiergateError::configuration(
                "store_timeout_ms must be greater than 0",
            ));
        }

        if self.rate_limit.enabled && self.rate_limit.max_per_minute == 0 {
            return Err(TiergateError::configuration(
                "Rate limit max_per_minute must be greater than 0 when enabled",
            ));
        }

        Ok(())
    }
}

/// Builder for [`Config`] with environment variable support.
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_quota_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.metering.quota_failure_policy = policy;
        self
    }

    pub fn with_store_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.metering.store_timeout_ms = timeout_ms;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Load configuration from `TIERGATE_` prefixed environment variables.
    pub fn from_env(mut self) -> Self {
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = env_flag("LOG_JSON") {
            self.config.logging.json = json;
        }

        match parse_env_with_prefix::<FailurePolicy>("QUOTA_FAILURE_POLICY") {
            Some(Ok(policy)) => self.config.metering.quota_failure_policy = policy,
            Some(Err(raw)) => {
                tracing::warn!(value = %raw, "Ignoring invalid QUOTA_FAILURE_POLICY");
            }
            None => {}
        }
        match parse_env_with_prefix::<u64>("STORE_TIMEOUT_MS") {
            Some(Ok(ms)) => self.config.metering.store_timeout_ms = ms,
            Some(Err(raw)) => {
                tracing::warn!(value = %raw, "Ignoring invalid STORE_TIMEOUT_MS");
            }
            None => {}
        }

        self.config.rate_limit = RateLimitConfig::from_env();
        self
    }

    /// Build the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// `Configuration` for an unknown log level, a zero store timeout, or an
    /// enabled rate limiter that allows zero calls.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
