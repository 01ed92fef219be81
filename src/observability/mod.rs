//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Executor, dispatcher and credential produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, in-flight gauge)
//!     → tracing.rs (spans with call IDs)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → EventBus observers (events::observers)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Call ID flows through every attempt of a call
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use logging::init_logging;
pub use metrics::init_metrics;
