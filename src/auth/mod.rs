//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! RequestExecutor
//!     → credential.rs (cached token, or one acquisition for all callers)
//!     → flows.rs, jwt.rs, soap.rs (TokenSource implementations)
//!     → Dispatcher (token request rides the same gate and retry loop)
//!
//! On 401:
//!     RequestExecutor → credential.refresh_from(sent token)
//!     → at most one refresh per stale token
//! ```
//!
//! # Design Decisions
//! - The credential is owned by the client, never global
//! - Secrets are redacted from every Debug/Display impl

pub mod credential;
pub mod flows;
pub mod jwt;
pub mod soap;
pub mod token;

pub use credential::{Credential, TokenSource};
pub use flows::{ClientCredentialsFlow, StaticToken};
pub use jwt::JwtBearerFlow;
pub use soap::SoapLogin;
pub use token::{AccessToken, Token};
