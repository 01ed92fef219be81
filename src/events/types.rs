//! Events published during a call.

use std::fmt;
use std::time::Duration;

use crate::http::request::ApiRequest;
use crate::http::response::ApiResponse;
use crate::resilience::context::Outcome;

/// Header carrying the org-wide API usage counters.
pub const LIMIT_INFO_HEADER: &str = "sforce-limit-info";

/// Org-wide API consumption reported by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiUsage {
    pub consumed: u64,
    pub limit: u64,
}

impl ApiUsage {
    /// Parse `api-usage=25/15000` out of a `Sforce-Limit-Info` value.
    pub fn parse(header: &str) -> Option<Self> {
        header.split(',').find_map(|part| {
            let value = part.trim().strip_prefix("api-usage=")?;
            let (consumed, limit) = value.split_once('/')?;
            Some(Self {
                consumed: consumed.trim().parse().ok()?,
                limit: limit.trim().parse().ok()?,
            })
        })
    }

    pub fn from_response(response: &ApiResponse) -> Option<Self> {
        response.header(LIMIT_INFO_HEADER).and_then(Self::parse)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.consumed)
    }
}

impl fmt::Display for ApiUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.consumed, self.limit)
    }
}

/// Something observable happened while serving a call.
#[derive(Debug, Clone)]
pub enum Event {
    /// A request is about to be sent for the first time.
    RequestIssued { request: ApiRequest },

    /// A call completed successfully.
    ResponseReceived { response: ApiResponse },

    /// An attempt failed and another one was granted.
    RetryScheduled {
        /// 1-based number of the retry being scheduled.
        attempt: u32,
        /// Label of the rule that granted it.
        rule: String,
        delay: Duration,
        request: ApiRequest,
        outcome: Outcome,
    },

    /// An attempt reached the API and counts against the org quota.
    ApiCallAccounted { response: ApiResponse, count: u32 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::RequestIssued { .. } => "request_issued",
            Event::ResponseReceived { .. } => "response_received",
            Event::RetryScheduled { .. } => "retry_scheduled",
            Event::ApiCallAccounted { .. } => "api_call_accounted",
        }
    }

    /// The response attached to this event, if any.
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            Event::RequestIssued { .. } => None,
            Event::ResponseReceived { response } | Event::ApiCallAccounted { response, .. } => {
                Some(response)
            }
            Event::RetryScheduled { outcome, .. } => match outcome {
                Outcome::Response(response) => Some(response),
                Outcome::Failure(_) => None,
            },
        }
    }

    /// API usage reported by the attached response.
    pub fn api_usage(&self) -> Option<ApiUsage> {
        self.response().and_then(ApiUsage::from_response)
    }
}
