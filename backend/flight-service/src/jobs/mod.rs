//! Background jobs
//!
//! Interval-driven loops, each owning its own ticker and stopping on the
//! shared shutdown signal, so cadences are tunable and testable without a
//! real clock.

pub mod airport_cache_refresh;
pub mod backlog_reconciler;

pub use airport_cache_refresh::start_airport_cache_refresh;
pub use backlog_reconciler::start_backlog_reconciler;
