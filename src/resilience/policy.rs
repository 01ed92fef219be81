//! Immutable retry policy.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::resilience::backoff::Backoff;
use crate::resilience::context::RetryContext;
use crate::resilience::rules::{ExceptionRule, ResponseRule};

/// Default global retry budget per call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default wall-clock window in which retries may be granted.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Rules, budgets and backoff shared by every call of a client.
///
/// Built once through [`RetryPolicy::builder`] and never mutated; each call
/// tracks its own consumption in a [`RetryContext`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    response_rules: Arc<[ResponseRule]>,
    exception_rules: Arc<[ExceptionRule]>,
    max_retries: u32,
    timeout: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            response_rules: Arc::from(Vec::new()),
            exception_rules: Arc::from(Vec::new()),
            max_retries: 0,
            timeout: DEFAULT_TIMEOUT,
            backoff: Backoff::default(),
        }
    }

    /// Start tracking a single logical call.
    pub fn create_context(&self) -> RetryContext<'_> {
        RetryContext::new(self)
    }

    pub fn response_rules(&self) -> &[ResponseRule] {
        &self.response_rules
    }

    pub fn exception_rules(&self) -> &[ExceptionRule] {
        &self.exception_rules
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Best-effort window; a call may overrun it by up to `backoff.max`.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    response_rules: Vec<ResponseRule>,
    exception_rules: Vec<ExceptionRule>,
    max_retries: u32,
    timeout: Duration,
    backoff: Backoff,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            response_rules: Vec::new(),
            exception_rules: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicyBuilder {
    /// Append a response rule. Order is evaluation order.
    pub fn response_rule(mut self, rule: ResponseRule) -> Self {
        self.response_rules.push(rule);
        self
    }

    /// Append an exception rule. Order is evaluation order.
    pub fn exception_rule(mut self, rule: ExceptionRule) -> Self {
        self.exception_rules.push(rule);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff.base = base;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff.factor = factor;
        self
    }

    pub fn backoff_max(mut self, max: Duration) -> Self {
        self.backoff.max = max;
        self
    }

    pub fn backoff_jitter(mut self, jitter: bool) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, ConfigurationError> {
        self.backoff.validate()?;
        Ok(RetryPolicy {
            response_rules: Arc::from(self.response_rules),
            exception_rules: Arc::from(self.exception_rules),
            max_retries: self.max_retries,
            timeout: self.timeout,
            backoff: self.backoff,
        })
    }
}
