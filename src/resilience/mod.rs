//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! RetryPolicy (shared, immutable)
//!     → create_context() per logical call
//!     → attempt completes as Outcome::Response | Outcome::Failure
//!     → context.rs (global budget, timeout window)
//!     → rules.rs (first eligible matching rule wins, consumes its budget)
//!     → backoff.rs (sleep before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Policies are built once and never change; reload swaps a whole policy
//! - Decisions are pure apart from user predicates; sleeping and sending
//!   belong to the caller
//! - Response rules see responses, exception rules see transport failures,
//!   nothing sees a 401

pub mod backoff;
pub mod context;
pub mod defaults;
pub mod policy;
pub mod rules;

pub use backoff::Backoff;
pub use context::{Outcome, RetryContext};
pub use policy::{RetryPolicy, RetryPolicyBuilder};
pub use rules::{ExceptionRule, ResponseRule};
