//! Event subsystem.
//!
//! # Data Flow
//! ```text
//! RequestExecutor / Dispatcher / token flows
//!     → types.rs (Event value)
//!     → bus.rs (snapshot observers, deliver concurrently)
//!     → observers.rs (tracing, metrics, in-memory stats) or user observers
//! ```
//!
//! # Design Decisions
//! - Events are observations only; nothing an observer does changes a call
//! - Publishing waits for every observer before the call moves on
//! - Observer failures are logged and counted, never returned to the caller

pub mod bus;
pub mod observers;
pub mod types;

pub use bus::{EventBus, Observer, PublishReport, SubscriptionId, SyncObserver};
pub use observers::{MetricsObserver, Stats, StatsObserver, TracingObserver};
pub use types::{ApiUsage, Event};
