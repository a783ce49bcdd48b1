//! Observability: structured logging and purge metrics.
//!
//! - Logging through `tracing`, with the subscriber configured from
//!   `[observability.logging]` (pretty, compact or JSON)
//! - Prometheus counters for purge deletions, outcomes and retries

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
