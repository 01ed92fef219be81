//! Authenticated call execution.
//!
//! # Responsibilities
//! - Attach the bearer token and client headers to every call
//! - Run the dispatcher's retry loop under a per-call `RetryContext`
//! - Re-authenticate once when the API answers 401
//! - Turn the final outcome into a response or a typed error
//!
//! # Design Decisions
//! - The policy is snapshotted when a call starts; a reload never changes a
//!   call already in progress
//! - The resend after re-authentication shares the call's context, so it
//!   draws on the same budget and timeout window
//! - A second 401 is terminal; there is no second refresh

use std::fmt;
use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use tracing::Instrument;

use crate::auth::Credential;
use crate::error::{ApiError, ConfigurationError, Error, Result};
use crate::events::Event;
use crate::http::dispatch::Dispatcher;
use crate::http::request::ApiRequest;
use crate::http::response::ApiResponse;
use crate::observability::metrics;
use crate::observability::tracing::call_span;
use crate::resilience::{RetryContext, RetryPolicy};

pub const CALL_OPTIONS_HEADER: HeaderName = HeaderName::from_static("sforce-call-options");
pub const LINE_ENDING_HEADER: HeaderName = HeaderName::from_static("sforce-line-ending");

/// Sends API calls with authentication, retries and error mapping.
pub struct RequestExecutor {
    dispatcher: Arc<Dispatcher>,
    credential: Arc<Credential>,
    user_agent: HeaderValue,
    call_options: HeaderValue,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("dispatcher", &self.dispatcher)
            .field("credential", &self.credential)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        credential: Arc<Credential>,
        user_agent: &str,
    ) -> std::result::Result<Self, ConfigurationError> {
        let invalid = || ConfigurationError::InvalidHeader {
            name: "user-agent",
            value: user_agent.to_string(),
        };
        let agent = HeaderValue::from_str(user_agent).map_err(|_| invalid())?;
        let call_options =
            HeaderValue::from_str(&format!("client={user_agent}")).map_err(|_| invalid())?;
        Ok(Self {
            dispatcher,
            credential,
            user_agent: agent,
            call_options,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn credential(&self) -> &Arc<Credential> {
        &self.credential
    }

    /// The policy new calls will use.
    pub fn policy(&self) -> Arc<RetryPolicy> {
        self.dispatcher.policy()
    }

    /// Swap the policy for calls started from now on, token requests included.
    pub fn set_policy(&self, policy: RetryPolicy) {
        self.dispatcher.set_policy(policy);
    }

    /// Execute one logical call.
    ///
    /// Returns the final 2xx response. Retried failures are only visible on
    /// the event bus.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let span = call_span(&request);
        self.run(request).instrument(span).await
    }

    fn prepare(&self, request: &mut ApiRequest, token: &str) -> Result<()> {
        request.set_bearer(token)?;
        request.set_header(USER_AGENT, self.user_agent.clone());
        request.set_header(CALL_OPTIONS_HEADER, self.call_options.clone());
        request.set_header(LINE_ENDING_HEADER, HeaderValue::from_static("LF"));
        Ok(())
    }

    async fn run(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        let token = self.credential.get_token(&self.dispatcher).await?;
        self.prepare(&mut request, token.secret())?;
        self.dispatcher
            .publish(Event::RequestIssued {
                request: request.clone(),
            })
            .await;

        let policy = self.dispatcher.policy();
        let mut context = policy.create_context();

        let mut response = self.send(&request, &mut context).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!("Access token rejected, re-authenticating");
            let fresh = self.credential.refresh_from(&token, &self.dispatcher).await?;
            request.set_bearer(fresh.secret())?;
            response = self.send(&request, &mut context).await?;
        }

        let status = response.status().as_u16();
        metrics::record_request(status);
        if !response.is_success() {
            let err = ApiError::from_response(response);
            tracing::error!(
                status,
                retries = context.total_retries(),
                error = %err,
                "Call failed"
            );
            return Err(err.into());
        }

        if let Some(warning) = response.warning() {
            tracing::warn!(warning = %warning, "API returned a warning");
            metrics::record_warning();
        }

        tracing::debug!(status, retries = context.total_retries(), "Call succeeded");
        self.dispatcher
            .publish(Event::ResponseReceived {
                response: response.clone(),
            })
            .await;
        Ok(response)
    }

    async fn send(
        &self,
        request: &ApiRequest,
        context: &mut RetryContext<'_>,
    ) -> Result<ApiResponse> {
        match self.dispatcher.send_with_retries(request, context).await {
            Ok(response) => Ok(response),
            Err(failure) => {
                metrics::record_failed_request();
                tracing::error!(
                    error = %failure,
                    retries = context.total_retries(),
                    "Call failed without a response"
                );
                Err(Error::Transport(failure))
            }
        }
    }
}
