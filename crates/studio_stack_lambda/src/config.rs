//! Handler configuration from the Lambda environment.

use std::time::Duration;

use chrono::{DateTime, Utc};
use studio_stack_core::poll::{PollPolicy, TEARDOWN_CEILING};
use studio_stack_core::stack::DOMAIN_INVOCATION_TIMEOUT;
use thiserror::Error;

pub const POLL_INITIAL_INTERVAL_SECS: &str = "POLL_INITIAL_INTERVAL_SECS";
pub const POLL_MAX_INTERVAL_SECS: &str = "POLL_MAX_INTERVAL_SECS";
pub const DOMAIN_ACTIVATION_TIMEOUT_SECS: &str = "DOMAIN_ACTIVATION_TIMEOUT_SECS";
pub const APP_TEARDOWN_TIMEOUT_SECS: &str = "APP_TEARDOWN_TIMEOUT_SECS";

/// Time kept in reserve to report the outcome before the invocation is killed.
pub const DEADLINE_MARGIN: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be a whole number of seconds, got '{value}'")]
    NotSeconds { key: &'static str, value: String },
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerConfig {
    pub poll_initial_interval: Duration,
    pub poll_max_interval: Duration,
    pub domain_activation_timeout: Duration,
    pub app_teardown_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            poll_initial_interval: Duration::from_secs(5),
            poll_max_interval: Duration::from_secs(30),
            domain_activation_timeout: Duration::from_secs(540),
            app_teardown_timeout: Duration::from_secs(870),
        }
    }
}

impl HandlerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_initial_interval: seconds(
                &lookup,
                POLL_INITIAL_INTERVAL_SECS,
                defaults.poll_initial_interval,
            )?,
            poll_max_interval: seconds(&lookup, POLL_MAX_INTERVAL_SECS, defaults.poll_max_interval)?,
            domain_activation_timeout: seconds(
                &lookup,
                DOMAIN_ACTIVATION_TIMEOUT_SECS,
                defaults.domain_activation_timeout,
            )?,
            app_teardown_timeout: seconds(
                &lookup,
                APP_TEARDOWN_TIMEOUT_SECS,
                defaults.app_teardown_timeout,
            )?,
        })
    }

    /// Budget for waiting on domain activation within this invocation.
    pub fn domain_poll_policy(&self, remaining: Duration) -> PollPolicy {
        PollPolicy::new(
            self.poll_initial_interval,
            self.poll_max_interval,
            self.domain_activation_timeout,
        )
        .capped_at(DOMAIN_INVOCATION_TIMEOUT)
        .bounded_by(remaining, DEADLINE_MARGIN)
    }

    /// Budget for waiting on app deletion; never exceeds the teardown ceiling.
    pub fn teardown_poll_policy(&self, remaining: Duration) -> PollPolicy {
        PollPolicy::new(
            self.poll_initial_interval,
            self.poll_max_interval,
            self.app_teardown_timeout,
        )
        .capped_at(TEARDOWN_CEILING)
        .bounded_by(remaining, DEADLINE_MARGIN)
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = lookup(key).filter(|value| !value.trim().is_empty()) else {
        return Ok(default);
    };
    let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::NotSeconds {
        key,
        value: raw.clone(),
    })?;
    if secs == 0 {
        return Err(ConfigError::Zero { key });
    }
    Ok(Duration::from_secs(secs))
}

/// Time left until the invocation deadline (epoch milliseconds).
pub fn remaining_invocation_time(deadline_ms: u64, now: DateTime<Utc>) -> Duration {
    let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    Duration::from_millis(deadline_ms.saturating_sub(now_ms))
}
