//! Error types crossing the client boundary.
//!
//! Only terminal outcomes are represented here. Intermediate failures that
//! were retried are visible through the event bus, never as errors.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::http::response::ApiResponse;
use crate::http::transport::TransportError;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failure of a call.
#[derive(Debug, Error)]
pub enum Error {
    /// The send failed and no exception rule granted another attempt.
    #[error(transparent)]
    Transport(Arc<TransportError>),

    /// The remote API answered with a non-2xx status that was not retried.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A token could not be acquired or refreshed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Illegal policy or client configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(Arc::new(err))
    }
}

impl From<Arc<TransportError>> for Error {
    fn from(err: Arc<TransportError>) -> Self {
        Error::Transport(err)
    }
}

/// Classification of a non-2xx response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    RequestLimit,
    Server,
    Other,
}

const REQUEST_LIMIT_CODE: &str = "REQUEST_LIMIT_EXCEEDED";

/// A non-2xx response converted into a typed error.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} ({status}): {}", display_message(.error_code, .message))]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: u16,
    pub error_code: Option<String>,
    pub message: String,
    pub response: ApiResponse,
}

fn display_message(error_code: &Option<String>, message: &str) -> String {
    match error_code {
        Some(code) => format!("[{code}] {message}"),
        None => message.to_string(),
    }
}

#[derive(Deserialize)]
struct RestErrorEntry {
    #[serde(rename = "errorCode")]
    error_code: String,
    message: String,
}

#[derive(Deserialize)]
struct OAuthError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Extract `(error_code, message)` from the remote error envelope.
///
/// Understands the REST array form `[{"errorCode", "message"}]` and the OAuth
/// form `{"error", "error_description"}`; falls back to the raw body.
pub(crate) fn parse_error_envelope(response: &ApiResponse) -> (Option<String>, String) {
    if let Ok(entries) = response.json::<Vec<RestErrorEntry>>() {
        if let Some(first) = entries.into_iter().next() {
            return (Some(first.error_code), first.message);
        }
    }
    if let Ok(oauth) = response.json::<OAuthError>() {
        let message = oauth.error_description.unwrap_or_else(|| oauth.error.clone());
        return (Some(oauth.error), message);
    }
    let text = response.text();
    let message = if text.trim().is_empty() {
        response
            .status()
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        text
    };
    (None, message)
}

impl ApiError {
    /// Convert a non-2xx response into a typed error.
    pub fn from_response(response: ApiResponse) -> Self {
        let status = response.status().as_u16();
        let (error_code, message) = parse_error_envelope(&response);
        let limit_hit = error_code.as_deref() == Some(REQUEST_LIMIT_CODE);
        let kind = match status {
            _ if limit_hit => ApiErrorKind::RequestLimit,
            429 => ApiErrorKind::RequestLimit,
            400 => ApiErrorKind::BadRequest,
            401 => ApiErrorKind::Unauthorized,
            403 => ApiErrorKind::Forbidden,
            404 => ApiErrorKind::NotFound,
            405 => ApiErrorKind::MethodNotAllowed,
            409 => ApiErrorKind::Conflict,
            500..=599 => ApiErrorKind::Server,
            _ => ApiErrorKind::Other,
        };
        Self {
            kind,
            status,
            error_code,
            message,
            response,
        }
    }
}

/// Failure to obtain a token.
///
/// Cloneable so a single failed acquisition can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The authorization server refused the credentials.
    #[error("authentication rejected ({status}): {}", display_message(.error_code, .message))]
    Rejected {
        status: u16,
        error_code: Option<String>,
        message: String,
    },

    /// The token endpoint answered 2xx but the token could not be read.
    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    /// The token request never produced a response.
    #[error("token request failed: {0}")]
    Transport(Arc<TransportError>),

    /// A JWT assertion could not be signed.
    #[error("could not sign assertion: {0}")]
    Signing(String),
}

impl AuthError {
    pub(crate) fn rejected(response: &ApiResponse) -> Self {
        let (error_code, message) = parse_error_envelope(response);
        AuthError::Rejected {
            status: response.status().as_u16(),
            error_code,
            message,
        }
    }
}

/// Illegal configuration, raised synchronously at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("exception rule over `{type_name}` is not allowed: {reason}")]
    IllegalExceptionRule {
        type_name: &'static str,
        reason: &'static str,
    },

    #[error("invalid backoff: {0}")]
    InvalidBackoff(String),

    #[error("invalid retry timeout: {0}")]
    InvalidTimeout(String),

    #[error("concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("invalid API version '{0}', expected something like '60.0'")]
    InvalidVersion(String),

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid request path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("no token source configured")]
    MissingTokenSource,

    #[error("invalid private key {origin}: {reason}")]
    InvalidPrivateKey { origin: String, reason: String },

    #[error("invalid value for header `{name}`: {value:?}")]
    InvalidHeader { name: &'static str, value: String },
}
