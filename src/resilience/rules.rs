//! Retry rules.
//!
//! # Responsibilities
//! - Classify a completed response (`ResponseRule`) or a failed send
//!   (`ExceptionRule`) as retryable
//! - Carry a per-rule retry budget
//!
//! # Design Decisions
//! - Synchronous predicates run on the blocking pool so a slow user closure
//!   cannot stall the runtime; async predicates are awaited in place
//! - A predicate that panics is reported and treated as "do not retry"
//! - Exception rules target a concrete error type found anywhere in the
//!   failure's `source()` chain

use std::any::{type_name, TypeId};
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::{ApiError, AuthError, ConfigurationError, Error};
use crate::http::response::ApiResponse;
use crate::http::transport::TransportError;

/// Default per-rule retry budget.
pub const DEFAULT_RULE_MAX_RETRIES: u32 = 3;

type ErasedError = dyn StdError + Send + Sync + 'static;

enum Predicate<T: ?Sized> {
    Always,
    Blocking(Arc<dyn Fn(&T) -> bool + Send + Sync>),
    Async(Arc<dyn Fn(&T) -> BoxFuture<'static, bool> + Send + Sync>),
}

impl<T: ?Sized> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        match self {
            Predicate::Always => Predicate::Always,
            Predicate::Blocking(f) => Predicate::Blocking(Arc::clone(f)),
            Predicate::Async(f) => Predicate::Async(Arc::clone(f)),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => f.write_str("Always"),
            Predicate::Blocking(_) => f.write_str("Blocking"),
            Predicate::Async(_) => f.write_str("Async"),
        }
    }
}

async fn run_blocking<F>(rule: &str, f: F) -> bool
where
    F: FnOnce() -> bool + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(rule = %rule, error = %e, "Retry predicate panicked, not retrying");
            false
        }
    }
}

/// Decide retryability from a completed response.
#[derive(Clone)]
pub struct ResponseRule {
    label: Cow<'static, str>,
    predicate: Predicate<ApiResponse>,
    max_retries: u32,
}

impl ResponseRule {
    /// Rule backed by a synchronous predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ApiResponse) -> bool + Send + Sync + 'static,
    {
        Self {
            label: Cow::Borrowed("response"),
            predicate: Predicate::Blocking(Arc::new(predicate)),
            max_retries: DEFAULT_RULE_MAX_RETRIES,
        }
    }

    /// Rule backed by an asynchronous predicate.
    ///
    /// The predicate borrows the response only to build its future; clone
    /// what the future needs (responses are cheap to clone).
    pub fn new_async<F>(predicate: F) -> Self
    where
        F: Fn(&ApiResponse) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        Self {
            label: Cow::Borrowed("response"),
            predicate: Predicate::Async(Arc::new(predicate)),
            max_retries: DEFAULT_RULE_MAX_RETRIES,
        }
    }

    /// Retry any response whose status satisfies `f`.
    pub fn status<F>(f: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        Self::new(move |response| f(response.status().as_u16())).named("status")
    }

    /// Retry responses whose body contains `needle`.
    pub fn body_contains(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::new(move |response| {
            needle.is_empty()
                || response
                    .body()
                    .windows(needle.len())
                    .any(|w| w == needle.as_bytes())
        })
        .named("body")
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Label used in logs and metrics.
    pub fn named(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn should_retry(&self, response: &ApiResponse) -> bool {
        match &self.predicate {
            Predicate::Always => true,
            Predicate::Blocking(f) => {
                let f = Arc::clone(f);
                let response = response.clone();
                run_blocking(&self.label, move || f(&response)).await
            }
            Predicate::Async(f) => f(response).await,
        }
    }
}

impl fmt::Debug for ResponseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseRule")
            .field("label", &self.label)
            .field("predicate", &self.predicate)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Decide retryability from a failed send.
///
/// The target type `E` must appear somewhere in the failure's `source()`
/// chain (the `TransportError` itself, or e.g. the `reqwest::Error` or
/// `std::io::Error` it wraps).
///
/// The library's own terminal errors are rejected: they are produced only
/// after retries are exhausted, so a rule over them could never fire.
/// A catch-all rule over the erased `dyn Error` does not compile:
///
/// ```compile_fail
/// use resilient_client::resilience::ExceptionRule;
/// let _ = ExceptionRule::new::<Box<dyn std::error::Error + Send + Sync>>();
/// ```
#[derive(Clone)]
pub struct ExceptionRule {
    label: Cow<'static, str>,
    target: &'static str,
    matches: Arc<dyn Fn(&ErasedError) -> bool + Send + Sync>,
    predicate: Predicate<ErasedError>,
    max_retries: u32,
}

fn find_in_chain<'a, E>(err: &'a ErasedError) -> Option<&'a E>
where
    E: StdError + 'static,
{
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<E>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

fn check_target<E: 'static>() -> Result<(), ConfigurationError> {
    let id = TypeId::of::<E>();
    let domain = [
        TypeId::of::<Error>(),
        TypeId::of::<ApiError>(),
        TypeId::of::<AuthError>(),
        TypeId::of::<ConfigurationError>(),
    ];
    if domain.contains(&id) {
        return Err(ConfigurationError::IllegalExceptionRule {
            type_name: type_name::<E>(),
            reason: "client errors are raised only after retries are exhausted; \
                     use a ResponseRule instead",
        });
    }
    Ok(())
}

impl ExceptionRule {
    /// Retry every failure of type `E`.
    pub fn new<E>() -> Result<Self, ConfigurationError>
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::build::<E>(Predicate::Always)
    }

    /// Retry failures of type `E` for which `predicate` holds.
    pub fn when<E, F>(predicate: F) -> Result<Self, ConfigurationError>
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let erased = move |err: &ErasedError| find_in_chain::<E>(err).is_some_and(&predicate);
        Self::build::<E>(Predicate::Blocking(Arc::new(erased)))
    }

    /// Retry failures of type `E` for which the asynchronous `predicate` holds.
    pub fn when_async<E, F>(predicate: F) -> Result<Self, ConfigurationError>
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(&E) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        let erased = move |err: &ErasedError| -> BoxFuture<'static, bool> {
            match find_in_chain::<E>(err) {
                Some(e) => predicate(e),
                None => Box::pin(async { false }),
            }
        };
        Self::build::<E>(Predicate::Async(Arc::new(erased)))
    }

    fn build<E>(predicate: Predicate<ErasedError>) -> Result<Self, ConfigurationError>
    where
        E: StdError + Send + Sync + 'static,
    {
        check_target::<E>()?;
        let target = type_name::<E>();
        Ok(Self {
            label: Cow::Borrowed(target),
            target,
            matches: Arc::new(|err: &ErasedError| find_in_chain::<E>(err).is_some()),
            predicate,
            max_retries: DEFAULT_RULE_MAX_RETRIES,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn named(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Name of the targeted error type.
    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn should_retry(&self, failure: &Arc<TransportError>) -> bool {
        if !(self.matches)(&**failure) {
            return false;
        }
        match &self.predicate {
            Predicate::Always => true,
            Predicate::Blocking(f) => {
                let f = Arc::clone(f);
                let failure = Arc::clone(failure);
                run_blocking(&self.label, move || f(&*failure)).await
            }
            Predicate::Async(f) => f(&**failure).await,
        }
    }
}

impl fmt::Debug for ExceptionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionRule")
            .field("label", &self.label)
            .field("target", &self.target)
            .field("predicate", &self.predicate)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::transport::TransportErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn io_failure() -> Arc<TransportError> {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        Arc::new(TransportError::with_source(
            TransportErrorKind::Body,
            "read failed",
            io,
        ))
    }

    #[tokio::test]
    async fn test_response_rule_sync_and_async() {
        let sync_rule = ResponseRule::status(|s| s >= 500);
        assert!(sync_rule.should_retry(&ApiResponse::from_status(503, "")).await);
        assert!(!sync_rule.should_retry(&ApiResponse::from_status(404, "")).await);

        let async_rule = ResponseRule::new_async(|response| {
            let response = response.clone();
            Box::pin(async move { response.text().contains("retry me") })
        });
        assert!(async_rule.should_retry(&ApiResponse::from_status(500, "please retry me")).await);
        assert!(!async_rule.should_retry(&ApiResponse::from_status(500, "no")).await);
    }

    #[tokio::test]
    async fn test_body_contains() {
        let rule = ResponseRule::body_contains("UNABLE_TO_LOCK_ROW");
        let locked = ApiResponse::from_status(
            400,
            r#"[{"errorCode":"UNABLE_TO_LOCK_ROW","message":"unable to obtain exclusive access"}]"#,
        );
        assert!(rule.should_retry(&locked).await);
        assert!(!rule.should_retry(&ApiResponse::from_status(400, "[]")).await);
    }

    #[tokio::test]
    async fn test_exception_rule_matches_type_then_predicate() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let rule = ExceptionRule::when::<TransportError, _>(move |e| {
            counter.fetch_add(1, Ordering::SeqCst);
            !e.is_timeout()
        })
        .unwrap();

        assert!(rule.should_retry(&Arc::new(TransportError::connect("refused"))).await);
        assert!(!rule.should_retry(&Arc::new(TransportError::timeout("slow"))).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exception_rule_searches_source_chain() {
        let io_rule = ExceptionRule::when::<std::io::Error, _>(|e| {
            e.kind() == std::io::ErrorKind::ConnectionReset
        })
        .unwrap();
        assert!(io_rule.should_retry(&io_failure()).await);

        // No io::Error anywhere in the chain: predicate is never consulted.
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let fmt_rule = ExceptionRule::when::<std::fmt::Error, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();
        assert!(!fmt_rule.should_retry(&io_failure()).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exception_rule_async_predicate() {
        let rule = ExceptionRule::when_async::<TransportError, _>(|e| {
            let connect = e.is_connect();
            Box::pin(async move { connect })
        })
        .unwrap();
        assert!(rule.should_retry(&Arc::new(TransportError::connect("refused"))).await);
        assert!(!rule.should_retry(&io_failure()).await);
    }

    #[test]
    fn test_domain_errors_are_rejected() {
        let err = ExceptionRule::new::<Error>().unwrap_err();
        assert!(matches!(err, ConfigurationError::IllegalExceptionRule { .. }));
        assert!(ExceptionRule::new::<ApiError>().is_err());
        assert!(ExceptionRule::new::<AuthError>().is_err());
        assert!(ExceptionRule::when::<ConfigurationError, _>(|_| true).is_err());
        assert!(ExceptionRule::new::<TransportError>().is_ok());
    }

    #[tokio::test]
    async fn test_panicking_predicate_does_not_retry() {
        let rule = ResponseRule::new(|_| panic!("boom"));
        assert!(!rule.should_retry(&ApiResponse::from_status(500, "")).await);
    }

    #[test]
    fn test_defaults_and_labels() {
        let rule = ResponseRule::status(|s| s == 429).named("rate_limit");
        assert_eq!(rule.label(), "rate_limit");
        assert_eq!(rule.max_retries(), DEFAULT_RULE_MAX_RETRIES);

        let rule = ExceptionRule::new::<TransportError>().unwrap().with_max_retries(7);
        assert_eq!(rule.max_retries(), 7);
        assert!(rule.target().ends_with("TransportError"));
    }
}
