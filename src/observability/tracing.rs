//! Per-call tracing spans.
//!
//! Every logical call gets a UUID v4 `call_id`; retries, re-authentication
//! and observer warnings are all recorded inside that span.

use tracing::Span;
use uuid::Uuid;

use crate::http::request::ApiRequest;

/// Open the span for one `execute` call.
pub fn call_span(request: &ApiRequest) -> Span {
    let call_id = Uuid::new_v4();
    tracing::info_span!(
        "api_call",
        call_id = %call_id,
        method = %request.method(),
        path = %request.url().path(),
    )
}

/// Open the span for a token request.
pub fn auth_span(kind: &'static str) -> Span {
    tracing::info_span!("token_request", call_id = %Uuid::new_v4(), kind)
}
