//! Stock retry rules and config-driven policy construction.

use std::time::Duration;

use crate::config::schema::RetryConfig;
use crate::error::ConfigurationError;
use crate::http::transport::TransportError;
use crate::resilience::backoff::Backoff;
use crate::resilience::policy::RetryPolicy;
use crate::resilience::rules::{ExceptionRule, ResponseRule};

/// Error code the remote API uses for row-lock contention.
pub const ROW_LOCK_ERROR: &str = "UNABLE_TO_LOCK_ROW";

/// Retry transport failures other than timeouts.
///
/// A timed-out request may still have been applied server-side, so it is
/// left to the caller.
pub fn transport_errors() -> Result<ExceptionRule, ConfigurationError> {
    Ok(ExceptionRule::when::<TransportError, _>(|e| !e.is_timeout())?.named("transport"))
}

/// Retry any 5xx response.
pub fn server_errors() -> ResponseRule {
    ResponseRule::status(|status| status >= 500).named("server_error")
}

/// Retry responses reporting row-lock contention.
pub fn row_lock() -> ResponseRule {
    ResponseRule::body_contains(ROW_LOCK_ERROR).named("row_lock")
}

/// Retry 429 responses.
pub fn rate_limited() -> ResponseRule {
    ResponseRule::status(|status| status == 429).named("rate_limit")
}

fn secs(field: &str, value: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("{field} = {value}: {e}"))
}

impl RetryPolicy {
    /// The policy used when none is configured.
    pub fn standard() -> Result<Self, ConfigurationError> {
        Self::from_config(&RetryConfig::default())
    }

    /// Build a policy from the `[retries]` config section.
    pub fn from_config(config: &RetryConfig) -> Result<Self, ConfigurationError> {
        let backoff = Backoff {
            base: secs("backoff_base_secs", config.backoff_base_secs)
                .map_err(ConfigurationError::InvalidBackoff)?,
            factor: config.backoff_factor,
            max: secs("backoff_max_secs", config.backoff_max_secs)
                .map_err(ConfigurationError::InvalidBackoff)?,
            jitter: config.backoff_jitter,
        };
        let timeout =
            secs("timeout_secs", config.timeout_secs).map_err(ConfigurationError::InvalidTimeout)?;

        let mut builder = RetryPolicy::builder()
            .max_retries(config.max_retries)
            .timeout(timeout)
            .backoff(backoff);

        if config.retry_transport_errors {
            builder = builder.exception_rule(transport_errors()?.with_max_retries(config.rule_max_retries));
        }
        if config.retry_server_errors {
            builder = builder.response_rule(server_errors().with_max_retries(config.rule_max_retries));
        }
        if config.retry_row_lock {
            builder = builder.response_rule(row_lock().with_max_retries(config.rule_max_retries));
        }
        if config.retry_rate_limit {
            builder = builder.response_rule(rate_limited().with_max_retries(config.rule_max_retries));
        }
        builder.build()
    }
}
