//! HTTP call handling subsystem.
//!
//! # Data Flow
//! ```text
//! ApiClient::request(method, path)
//!     → request.rs (resendable request value)
//!     → executor.rs (token, client headers, RequestIssued, 401 handling)
//!     → dispatch.rs (gate, send, ApiCallAccounted, retry loop)
//!     → transport.rs (reqwest or any Transport impl)
//!     → response.rs (buffered response)
//!     → executor.rs (2xx → ResponseReceived, otherwise ApiError)
//! ```

pub mod dispatch;
pub mod executor;
pub mod request;
pub mod response;
pub mod transport;

pub use dispatch::Dispatcher;
pub use executor::RequestExecutor;
pub use request::ApiRequest;
pub use response::ApiResponse;
pub use transport::{ReqwestTransport, Transport, TransportError, TransportErrorKind};
