//! Gated, retrying send loop shared by API calls and token requests.
//!
//! # Responsibilities
//! - Bound the number of simultaneous sends with the concurrency gate
//! - Report every attempt that reached the API (`ApiCallAccounted`)
//! - Consult a `RetryContext` after each attempt and back off between them
//!
//! # Design Decisions
//! - A gate slot is held only for the send itself, never across a backoff
//!   sleep or a token acquisition
//! - A 401 is returned straight to the caller; re-authentication is the
//!   executor's job and is not a rule decision
//! - The retry event is published while the backoff sleep runs
//! - The retry policy lives here so API calls and token requests always read
//!   the same (hot-swappable) policy

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Semaphore;

use crate::error::ConfigurationError;
use crate::events::{Event, EventBus};
use crate::http::request::ApiRequest;
use crate::http::response::ApiResponse;
use crate::http::transport::{Transport, TransportError};
use crate::observability::metrics::InFlightGuard;
use crate::resilience::context::{Outcome, RetryContext};
use crate::resilience::policy::RetryPolicy;

/// Default number of simultaneous sends.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 100;

/// Unauthenticated sender: gate, transport and retry loop.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    gate: Semaphore,
    limit: usize,
    bus: Arc<EventBus>,
    policy: ArcSwap<RetryPolicy>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("limit", &self.limit)
            .field("in_flight", &self.in_flight())
            .field("bus", &self.bus)
            .finish()
    }
}

impl Dispatcher {
    /// Starts with [`RetryPolicy::none`]; see [`Dispatcher::with_policy`].
    pub fn new(
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
        concurrency_limit: usize,
    ) -> Result<Self, ConfigurationError> {
        if concurrency_limit == 0 || concurrency_limit > Semaphore::MAX_PERMITS {
            return Err(ConfigurationError::InvalidConcurrency);
        }
        Ok(Self {
            transport,
            gate: Semaphore::new(concurrency_limit),
            limit: concurrency_limit,
            bus,
            policy: ArcSwap::from_pointee(RetryPolicy::none()),
        })
    }

    pub fn with_policy(self, policy: RetryPolicy) -> Self {
        self.policy.store(Arc::new(policy));
        self
    }

    /// Snapshot of the current policy. Hold it for the whole logical call.
    pub fn policy(&self) -> Arc<RetryPolicy> {
        self.policy.load_full()
    }

    /// Swap the policy for calls and token requests started from now on.
    pub fn set_policy(&self, policy: RetryPolicy) {
        self.policy.store(Arc::new(policy));
        tracing::info!("Retry policy replaced");
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn concurrency_limit(&self) -> usize {
        self.limit
    }

    /// Sends currently holding a gate slot.
    pub fn in_flight(&self) -> usize {
        self.limit - self.gate.available_permits()
    }

    /// Publish an event. Observer failures are reported by the bus.
    pub async fn publish(&self, event: Event) {
        self.bus.publish(event).await;
    }

    /// One gated attempt.
    pub async fn send_once(&self, request: &ApiRequest) -> Outcome {
        let result = {
            let _permit = match self.gate.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    return Outcome::Failure(Arc::new(TransportError::closed(
                        "concurrency gate closed",
                    )))
                }
            };
            let _in_flight = InFlightGuard::new();
            self.transport.send(request).await
        };

        match result {
            Ok(response) => {
                tracing::debug!(status = response.status().as_u16(), "Attempt completed");
                self.publish(Event::ApiCallAccounted {
                    response: response.clone(),
                    count: 1,
                })
                .await;
                Outcome::Response(response)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Attempt failed");
                Outcome::Failure(Arc::new(e))
            }
        }
    }

    /// Send `request` until it succeeds, fails terminally or `context` stops
    /// granting retries.
    ///
    /// Only non-2xx responses other than 401 and transport failures are
    /// offered to the rules. Returns the last response whatever its status;
    /// only a transport failure that was not retried is an `Err`.
    pub async fn send_with_retries(
        &self,
        request: &ApiRequest,
        context: &mut RetryContext<'_>,
    ) -> Result<ApiResponse, Arc<TransportError>> {
        loop {
            let outcome = self.send_once(request).await;

            if let Outcome::Response(response) = &outcome {
                if response.is_success() || response.status().as_u16() == 401 {
                    return Ok(response.clone());
                }
            }

            if !context.should_retry(&outcome).await {
                return match outcome {
                    Outcome::Response(response) => Ok(response),
                    Outcome::Failure(error) => Err(error),
                };
            }

            let attempt = context.total_retries();
            let rule = context.last_rule().unwrap_or("unknown").to_string();
            let delay = context.next_delay();
            tracing::warn!(
                attempt,
                rule = %rule,
                delay_ms = delay.as_millis() as u64,
                "Retrying request"
            );
            let event = Event::RetryScheduled {
                attempt,
                rule,
                delay,
                request: request.clone(),
                outcome,
            };
            tokio::join!(tokio::time::sleep(delay), self.publish(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{ExceptionRule, ResponseRule, RetryPolicy};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        replies: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
        sends: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<ApiResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                sends: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ApiResponse::from_status(200, "")))
        }
    }

    fn request() -> ApiRequest {
        ApiRequest::get("https://acme.my.salesforce.com/services/data/v60.0/".parse().unwrap())
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::builder()
            .response_rule(ResponseRule::status(|s| s >= 500))
            .exception_rule(ExceptionRule::new::<TransportError>().unwrap())
            .backoff_base(Duration::ZERO)
            .backoff_jitter(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let transport = Scripted::new(vec![]);
        let err = Dispatcher::new(transport, Arc::new(EventBus::new()), 0).unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidConcurrency);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let transport = Scripted::new(vec![
            Err(TransportError::connect("refused")),
            Ok(ApiResponse::from_status(503, "")),
        ]);
        let dispatcher = Dispatcher::new(transport.clone(), Arc::new(EventBus::new()), 4).unwrap();
        let policy = fast_policy();
        let mut ctx = policy.create_context();

        let response = dispatcher.send_with_retries(&request(), &mut ctx).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.total_retries(), 2);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_is_returned_without_consulting_rules() {
        let transport = Scripted::new(vec![Ok(ApiResponse::from_status(401, ""))]);
        let dispatcher = Dispatcher::new(transport.clone(), Arc::new(EventBus::new()), 1).unwrap();
        let policy = RetryPolicy::builder()
            .response_rule(ResponseRule::status(|_| true))
            .build()
            .unwrap();
        let mut ctx = policy.create_context();

        let response = dispatcher.send_with_retries(&request(), &mut ctx).await.unwrap();
        assert_eq!(response.status().as_u16(), 401);
        assert_eq!(ctx.total_retries(), 0);
    }

    #[tokio::test]
    async fn test_unretried_failure_is_terminal() {
        let transport = Scripted::new(vec![Err(TransportError::timeout("slow"))]);
        let dispatcher = Dispatcher::new(transport, Arc::new(EventBus::new()), 1).unwrap();
        let policy = RetryPolicy::none();
        let mut ctx = policy.create_context();

        let err = dispatcher.send_with_retries(&request(), &mut ctx).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_policy_snapshot_survives_swap() {
        let dispatcher = Dispatcher::new(Scripted::new(vec![]), Arc::new(EventBus::new()), 1)
            .unwrap()
            .with_policy(fast_policy());
        let before = dispatcher.policy();
        dispatcher.set_policy(RetryPolicy::none());

        assert_eq!(before.response_rules().len(), 1);
        assert_eq!(dispatcher.policy().max_retries(), 0);
    }
}
