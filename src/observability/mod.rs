//! Observability for the table engine
//!
//! - Structured JSON logging
//! - Begin/complete scopes around table-wide operations
//! - Per-table counters
//!
//! Observability is read-only: it never changes what the engine does and
//! never fails an operation.

mod logger;
mod metrics;
mod scope;

pub use logger::{Level, Logger};
pub use metrics::{MetricsSnapshot, TableMetrics};
pub use scope::ObservationScope;
