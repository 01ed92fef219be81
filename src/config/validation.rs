//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Normalize the API version and instance URL
//! - Validate value ranges (budgets, durations, concurrency)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{AuthConfig, ClientConfig};
use crate::error::ConfigurationError;
use crate::resilience::RetryPolicy;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// A single semantic problem in a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Normalize an API version to the `"NN.0"` form.
///
/// Accepts an optional leading `v` and an optional `.` or `.0` suffix.
pub fn normalize_version(value: &str) -> Result<String, ConfigurationError> {
    let invalid = || ConfigurationError::InvalidVersion(value.to_string());
    let rest = value.strip_prefix('v').unwrap_or(value);
    let major = match rest.split_once('.') {
        Some((major, "" | "0")) => major,
        Some(_) => return Err(invalid()),
        None => rest,
    };
    if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    Ok(format!("{major}.0"))
}

/// Parse an instance URL and reduce it to its origin.
///
/// Plain `http` is only accepted for loopback hosts.
pub fn parse_base_url(value: &str) -> Result<Url, ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidBaseUrl {
        url: value.to_string(),
        reason: reason.to_string(),
    };
    let mut url = Url::parse(value.trim()).map_err(|e| invalid(&e.to_string()))?;
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
    let loopback = host == "localhost"
        || host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback());
    match url.scheme() {
        "https" => {}
        "http" if loopback => {}
        _ => return Err(invalid("scheme must be https")),
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn require(value: &str, field: &'static str, errors: &mut Vec<ValidationError>) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be empty"));
    }
}

fn validate_auth(auth: &AuthConfig, errors: &mut Vec<ValidationError>) {
    let configured: Vec<&str> = [
        ("client_credentials", auth.client_credentials.is_some()),
        ("static_token", auth.static_token.is_some()),
        ("jwt_bearer", auth.jwt_bearer.is_some()),
        ("soap_login", auth.soap_login.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, set)| set.then_some(name))
    .collect();
    match configured.len() {
        0 => errors.push(ValidationError::new(
            "auth",
            "one of client_credentials, static_token, jwt_bearer or soap_login is required",
        )),
        1 => {}
        _ => errors.push(ValidationError::new(
            "auth",
            format!("only one token source may be set, found {}", configured.join(", ")),
        )),
    }

    if let Some(creds) = &auth.client_credentials {
        require(&creds.client_id, "auth.client_credentials.client_id", errors);
        require(&creds.client_secret, "auth.client_credentials.client_secret", errors);
    }
    if let Some(token) = &auth.static_token {
        require(&token.token, "auth.static_token.token", errors);
    }
    if let Some(jwt) = &auth.jwt_bearer {
        require(&jwt.client_id, "auth.jwt_bearer.client_id", errors);
        require(&jwt.username, "auth.jwt_bearer.username", errors);
        if jwt.private_key_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "auth.jwt_bearer.private_key_file",
                "must not be empty",
            ));
        }
    }
    if let Some(soap) = &auth.soap_login {
        require(&soap.username, "auth.soap_login.username", errors);
        require(&soap.password, "auth.soap_login.password", errors);
    }
    if auth.token_ttl_secs == Some(0) {
        errors.push(ValidationError::new("auth.token_ttl_secs", "must be greater than 0"));
    }
}

/// Check a parsed config, collecting every problem found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = parse_base_url(&config.api.base_url) {
        errors.push(ValidationError::new("api.base_url", e.to_string()));
    }
    if let Err(e) = normalize_version(&config.api.version) {
        errors.push(ValidationError::new("api.version", e.to_string()));
    }
    if config.api.concurrency_limit == 0 {
        errors.push(ValidationError::new(
            "api.concurrency_limit",
            ConfigurationError::InvalidConcurrency.to_string(),
        ));
    }
    if config.api.user_agent.trim().is_empty() {
        errors.push(ValidationError::new("api.user_agent", "must not be empty"));
    }
    if config.api.request_timeout_secs == 0 {
        errors.push(ValidationError::new("api.request_timeout_secs", "must be greater than 0"));
    }

    if let Err(e) = RetryPolicy::from_config(&config.retries) {
        errors.push(ValidationError::new("retries", e.to_string()));
    }

    validate_auth(&config.auth, &mut errors);

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
