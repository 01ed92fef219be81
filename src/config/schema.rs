//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the API client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote API location and request limits.
    pub api: ApiConfig,

    /// Retry policy settings.
    pub retries: RetryConfig,

    /// Token source settings.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Remote API configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Instance URL (e.g., "https://mydomain.my.salesforce.com").
    pub base_url: String,

    /// API version; "60", "v60" and "60.0" are all accepted.
    pub version: String,

    /// Maximum simultaneous in-flight sends.
    pub concurrency_limit: usize,

    /// Sent as `User-Agent` and in `Sforce-Call-Options`.
    pub user_agent: String,

    /// Per-attempt transport timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://login.salesforce.com".to_string(),
            version: "60.0".to_string(),
            concurrency_limit: 100,
            user_agent: concat!("resilient-client/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Global retry budget per call.
    pub max_retries: u32,

    /// Window after which no new retry is granted, in seconds.
    pub timeout_secs: f64,

    /// Delay before the first retry, in seconds.
    pub backoff_base_secs: f64,

    /// Multiplier applied per retry.
    pub backoff_factor: f64,

    /// Upper bound for any single delay, in seconds.
    pub backoff_max_secs: f64,

    /// Randomize each delay within `[0, delay]`.
    pub backoff_jitter: bool,

    /// Retry connection-level failures (not timeouts).
    pub retry_transport_errors: bool,

    /// Retry 5xx responses.
    pub retry_server_errors: bool,

    /// Retry `UNABLE_TO_LOCK_ROW` responses.
    pub retry_row_lock: bool,

    /// Retry 429 responses.
    pub retry_rate_limit: bool,

    /// Budget of each stock rule.
    pub rule_max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_secs: 60.0,
            backoff_base_secs: 0.5,
            backoff_factor: 2.0,
            backoff_max_secs: 10.0,
            backoff_jitter: true,
            retry_transport_errors: true,
            retry_server_errors: true,
            retry_row_lock: true,
            retry_rate_limit: true,
            rule_max_retries: 3,
        }
    }
}

/// Token source configuration. Exactly one source must be set.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// OAuth 2.0 client credentials flow.
    pub client_credentials: Option<ClientCredentialsConfig>,

    /// Pre-issued access token.
    pub static_token: Option<StaticTokenConfig>,

    /// OAuth 2.0 JWT bearer flow.
    pub jwt_bearer: Option<JwtBearerConfig>,

    /// SOAP `login()` with user credentials.
    pub soap_login: Option<SoapLoginConfig>,

    /// Treat tokens as expired after this many seconds.
    pub token_ttl_secs: Option<u64>,
}

#[derive(Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientCredentialsConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq, Deserialize, Serialize)]
pub struct StaticTokenConfig {
    pub token: String,
}

impl std::fmt::Debug for StaticTokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenConfig")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JwtBearerConfig {
    pub client_id: String,
    pub username: String,
    /// PEM file holding the unencrypted RSA signing key.
    pub private_key_file: PathBuf,
}

#[derive(Clone, PartialEq, Deserialize, Serialize)]
pub struct SoapLoginConfig {
    pub username: String,
    pub password: String,
    /// Appended to the password; empty for trusted IP ranges.
    #[serde(default)]
    pub security_token: String,
}

impl std::fmt::Debug for SoapLoginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoapLoginConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("security_token", &"<redacted>")
            .finish()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
