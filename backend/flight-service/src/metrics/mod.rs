//! Prometheus metrics for the ingestion and delivery pipeline

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, CounterVec, Gauge, IntCounter,
};

lazy_static! {
    /// Tickets processed by batch ingestion (labels: status=success|failed)
    pub static ref TICKETS_INGESTED_TOTAL: CounterVec = register_counter_vec!(
        "flight_tickets_ingested_total",
        "Total number of flight tickets processed by batch ingestion",
        &["status"]
    )
    .unwrap();

    /// Publish attempts (labels: outcome=published|backlogged)
    pub static ref PUBLISH_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "flight_publish_attempts_total",
        "Total number of Kafka publish attempts for flight tickets",
        &["outcome"]
    )
    .unwrap();

    /// Entries currently sitting in the publish backlog
    pub static ref BACKLOG_SIZE: Gauge = register_gauge!(
        "flight_backlog_size",
        "Number of flight tickets awaiting redelivery in the backlog"
    )
    .unwrap();

    /// Backlog entries redelivered by the reconciliation sweep
    pub static ref BACKLOG_RECONCILED_TOTAL: IntCounter = register_int_counter!(
        "flight_backlog_reconciled_total",
        "Total number of backlogged tickets redelivered by the reconciler"
    )
    .unwrap();

    /// Consumer messages requeued with an incremented retry counter
    pub static ref CONSUMER_RETRIES_TOTAL: IntCounter = register_int_counter!(
        "flight_consumer_retries_total",
        "Total number of consumed messages requeued for retry"
    )
    .unwrap();

    /// Messages routed to a dead-letter topic after exhausting retries
    pub static ref DEAD_LETTERED_TOTAL: IntCounter = register_int_counter!(
        "flight_dead_lettered_total",
        "Total number of consumed messages routed to a dead-letter topic"
    )
    .unwrap();
}

pub fn record_ingested(success: usize, failed: usize) {
    TICKETS_INGESTED_TOTAL
        .with_label_values(&["success"])
        .inc_by(success as f64);
    TICKETS_INGESTED_TOTAL
        .with_label_values(&["failed"])
        .inc_by(failed as f64);
}

pub fn record_published() {
    PUBLISH_ATTEMPTS_TOTAL.with_label_values(&["published"]).inc();
}

pub fn record_backlogged() {
    PUBLISH_ATTEMPTS_TOTAL.with_label_values(&["backlogged"]).inc();
}
