//! Factory configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::models::start_info::StartInfo;
use crate::{Result, SessionError};

/// Retry bounds and backoff for session establishment.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum allocation attempts for the awaitable and blocking APIs.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Maximum interactive credential prompts per establishment.
    #[serde(default = "default_max_credential_prompts")]
    pub max_credential_prompts: u32,
    /// Maximum allocation attempts for the begin/end API.
    #[serde(default = "default_max_attempts")]
    pub legacy_max_attempts: u32,
    /// Delay before the first credential retry.
    #[serde(default = "default_initial_backoff_millis")]
    pub initial_backoff_millis: u64,
    /// Cap for the doubling retry delay.
    #[serde(default = "default_max_backoff_millis")]
    pub max_backoff_millis: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_credential_prompts: default_max_credential_prompts(),
            legacy_max_attempts: default_max_attempts(),
            initial_backoff_millis: default_initial_backoff_millis(),
            max_backoff_millis: default_max_backoff_millis(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_credential_prompts() -> u32 {
    3
}

fn default_initial_backoff_millis() -> u64 {
    500
}

fn default_max_backoff_millis() -> u64 {
    5000
}

/// Timeout applied when a caller does not pass one.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Whole-establishment timeout.
    #[serde(default = "default_session_seconds")]
    pub session_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            session_seconds: default_session_seconds(),
        }
    }
}

fn default_session_seconds() -> u64 {
    60
}

/// Host-name rewriting for clusters deployed on cloud virtual machines.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IaasConfig {
    /// DNS suffix appended to bare node names; defaults to the head node's domain.
    #[serde(default)]
    pub domain_suffix: Option<String>,
}

/// Configuration parsed from `cluster-session.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FactoryConfig {
    /// Retry bounds and backoff.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Default timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Cloud host-name rewriting.
    #[serde(default)]
    pub iaas: IaasConfig,
    /// Default session parameters used by the companion binary.
    #[serde(default)]
    pub session: Option<StartInfo>,
}

impl FactoryConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| SessionError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Timeout used when the caller passes none.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.session_seconds)
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1_u64 << retry.saturating_sub(1).min(16);
        let millis = self
            .retry
            .initial_backoff_millis
            .saturating_mul(factor)
            .min(self.retry.max_backoff_millis);
        Duration::from_millis(millis)
    }

    /// Validate bounds.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` on a zero attempt bound, a zero
    /// timeout, or an initial backoff larger than its cap.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(SessionError::Config(
                "retry.max_attempts must be greater than zero".into(),
            ));
        }
        if self.retry.legacy_max_attempts == 0 {
            return Err(SessionError::Config(
                "retry.legacy_max_attempts must be greater than zero".into(),
            ));
        }
        if self.timeouts.session_seconds == 0 {
            return Err(SessionError::Config(
                "timeouts.session_seconds must be greater than zero".into(),
            ));
        }
        if self.retry.initial_backoff_millis > self.retry.max_backoff_millis {
            return Err(SessionError::Config(
                "retry.initial_backoff_millis exceeds retry.max_backoff_millis".into(),
            ));
        }
        if let Some(session) = &self.session {
            session.validate()?;
        }
        Ok(())
    }
}
