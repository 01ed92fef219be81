//! Per-call retry bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::http::response::ApiResponse;
use crate::http::transport::TransportError;
use crate::resilience::policy::RetryPolicy;

/// Result of one send attempt, as seen by the retry logic.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The transport produced a response (any status).
    Response(ApiResponse),
    /// The transport failed before a response existed.
    Failure(Arc<TransportError>),
}

/// Mutable retry state for one logical call.
///
/// Borrows the shared policy; counters only ever increase.
#[derive(Debug)]
pub struct RetryContext<'p> {
    policy: &'p RetryPolicy,
    start: Instant,
    total: u32,
    response_counts: Vec<u32>,
    exception_counts: Vec<u32>,
    last_rule: Option<String>,
}

impl<'p> RetryContext<'p> {
    pub(crate) fn new(policy: &'p RetryPolicy) -> Self {
        Self {
            policy,
            start: Instant::now(),
            total: 0,
            response_counts: vec![0; policy.response_rules().len()],
            exception_counts: vec![0; policy.exception_rules().len()],
            last_rule: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.policy
    }

    /// Retries granted so far.
    pub fn total_retries(&self) -> u32 {
        self.total
    }

    /// Retries granted by the response rule at `index`.
    pub fn response_rule_retries(&self, index: usize) -> u32 {
        self.response_counts.get(index).copied().unwrap_or(0)
    }

    /// Retries granted by the exception rule at `index`.
    pub fn exception_rule_retries(&self, index: usize) -> u32 {
        self.exception_counts.get(index).copied().unwrap_or(0)
    }

    /// Label of the rule behind the most recent grant.
    pub fn last_rule(&self) -> Option<&str> {
        self.last_rule.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether the global budget and the timeout window still allow a retry.
    pub fn budget_remaining(&self) -> bool {
        self.total < self.policy.max_retries() && self.elapsed() <= self.policy.timeout()
    }

    /// Decide whether `outcome` earns another attempt.
    ///
    /// Rules are evaluated in order; rules whose own budget is spent are
    /// skipped without consulting their predicate. The first rule that
    /// matches consumes one unit of its budget and one of the global budget.
    pub async fn should_retry(&mut self, outcome: &Outcome) -> bool {
        if self.total >= self.policy.max_retries() {
            tracing::debug!(max_retries = self.policy.max_retries(), "Retry budget exhausted");
            return false;
        }
        if self.elapsed() > self.policy.timeout() {
            tracing::debug!(
                timeout_secs = self.policy.timeout().as_secs_f64(),
                "Retry window elapsed"
            );
            return false;
        }

        let policy = self.policy;
        let granted = match outcome {
            Outcome::Response(response) => {
                let mut granted = None;
                for (index, rule) in policy.response_rules().iter().enumerate() {
                    if self.response_counts[index] >= rule.max_retries() {
                        continue;
                    }
                    if rule.should_retry(response).await {
                        self.response_counts[index] += 1;
                        granted = Some(rule.label());
                        break;
                    }
                }
                granted
            }
            Outcome::Failure(failure) => {
                let mut granted = None;
                for (index, rule) in policy.exception_rules().iter().enumerate() {
                    if self.exception_counts[index] >= rule.max_retries() {
                        continue;
                    }
                    if rule.should_retry(failure).await {
                        self.exception_counts[index] += 1;
                        granted = Some(rule.label());
                        break;
                    }
                }
                granted
            }
        };

        match granted {
            Some(label) => {
                self.total += 1;
                tracing::debug!(
                    rule = %label,
                    attempt = self.total,
                    max_retries = policy.max_retries(),
                    "Retry granted"
                );
                self.last_rule = Some(label.to_string());
                true
            }
            None => false,
        }
    }

    /// Sleep duration before the retry that was just granted.
    ///
    /// Zero-based: the first retry uses attempt index 0.
    pub fn next_delay(&self) -> Duration {
        self.policy
            .backoff()
            .sleep_duration(self.total.saturating_sub(1))
    }
}
