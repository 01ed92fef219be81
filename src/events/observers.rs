//! Stock observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::events::bus::Observer;
use crate::events::types::{ApiUsage, Event};
use crate::http::transport::BoxError;
use crate::observability::metrics;
use crate::resilience::context::Outcome;

/// Logs every event with `tracing`.
///
/// # Log Levels
///
/// - `RequestIssued`, `ApiCallAccounted`: DEBUG
/// - `ResponseReceived`: INFO
/// - `RetryScheduled`: WARN
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

#[async_trait]
impl Observer for TracingObserver {
    async fn on_event(&self, event: Arc<Event>) -> Result<(), BoxError> {
        match &*event {
            Event::RequestIssued { request } => {
                tracing::debug!(method = %request.method(), url = %request.url(), "Request issued");
            }
            Event::ResponseReceived { response } => {
                tracing::info!(status = response.status().as_u16(), "Response received");
            }
            Event::RetryScheduled {
                attempt,
                rule,
                delay,
                outcome,
                ..
            } => {
                let failure = match outcome {
                    Outcome::Response(response) => format!("status {}", response.status().as_u16()),
                    Outcome::Failure(error) => error.to_string(),
                };
                tracing::warn!(
                    attempt = *attempt,
                    rule = %rule,
                    delay_ms = delay.as_millis() as u64,
                    failure = %failure,
                    "Attempt failed, will retry"
                );
            }
            Event::ApiCallAccounted { count, .. } => {
                match event.api_usage() {
                    Some(usage) => tracing::debug!(count = *count, usage = %usage, "API call accounted"),
                    None => tracing::debug!(count = *count, "API call accounted"),
                }
            }
        }
        Ok(())
    }
}

/// Feeds events into the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

#[async_trait]
impl Observer for MetricsObserver {
    async fn on_event(&self, event: Arc<Event>) -> Result<(), BoxError> {
        match &*event {
            Event::RetryScheduled { rule, .. } => metrics::record_retry(rule),
            Event::ApiCallAccounted { count, .. } => {
                metrics::record_api_calls(u64::from(*count));
                if let Some(usage) = event.api_usage() {
                    metrics::record_api_usage(usage.consumed, usage.limit);
                }
            }
            Event::RequestIssued { .. } | Event::ResponseReceived { .. } => {}
        }
        Ok(())
    }
}

/// Point-in-time copy of [`StatsObserver`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub requests: u64,
    pub responses: u64,
    pub retries: u64,
    pub api_calls: u64,
    pub last_usage: Option<ApiUsage>,
}

/// Counts events in memory.
#[derive(Debug, Default)]
pub struct StatsObserver {
    requests: AtomicU64,
    responses: AtomicU64,
    retries: AtomicU64,
    api_calls: AtomicU64,
    last_usage: Mutex<Option<ApiUsage>>,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
            last_usage: self.last_usage.lock().map(|u| *u).unwrap_or(None),
        }
    }
}

#[async_trait]
impl Observer for StatsObserver {
    async fn on_event(&self, event: Arc<Event>) -> Result<(), BoxError> {
        match &*event {
            Event::RequestIssued { .. } => {
                self.requests.fetch_add(1, Ordering::Relaxed);
            }
            Event::ResponseReceived { .. } => {
                self.responses.fetch_add(1, Ordering::Relaxed);
            }
            Event::RetryScheduled { .. } => {
                self.retries.fetch_add(1, Ordering::Relaxed);
            }
            Event::ApiCallAccounted { count, .. } => {
                self.api_calls.fetch_add(u64::from(*count), Ordering::Relaxed);
                if let Some(usage) = event.api_usage() {
                    let mut last = self
                        .last_usage
                        .lock()
                        .map_err(|_| "usage lock poisoned")?;
                    *last = Some(usage);
                }
            }
        }
        Ok(())
    }
}
