//! Flight Service Library
//!
//! Ingests flight-ticket records, persists them transactionally in Postgres
//! and republishes them on Kafka for downstream consumers (weather
//! correlation, reporting). Broker unavailability is tolerated through a
//! durable Redis-backed backlog that a periodic reconciler drains. The
//! consumer side subscribes to the same bus, retries failed messages a
//! bounded number of times and routes exhausted ones to a dead-letter topic.
//!
//! # Modules
//!
//! - `models`: Entities, request types and validation
//! - `db`: sqlx repositories for airports and flight tickets
//! - `cache`: Redis read-through cache and the durable publish backlog
//! - `services`: Airport resolver and the batch ingestion coordinator
//! - `kafka`: Producer (publish-or-backlog) and consumer (retry/dead-letter)
//! - `jobs`: Backlog reconciliation and airport cache refresh loops
//! - `notifications`: In-process broadcast hub for pipeline events
//! - `error`: Error types and handling
//! - `config`: Configuration management
//! - `metrics`: Prometheus metrics collection

pub mod cache;
pub mod config;
pub mod consumers;
pub mod db;
pub mod error;
pub mod jobs;
pub mod kafka;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
