//! Resilient HTTP API client library

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod observability;
pub mod resilience;

pub use client::{ApiClient, ApiClientBuilder};
pub use config::schema::ClientConfig;
pub use error::{ApiError, ApiErrorKind, AuthError, ConfigurationError, Error, Result};
pub use events::{Event, EventBus};
pub use resilience::{ExceptionRule, ResponseRule, RetryPolicy};
