//! Flight data producer
//!
//! Publishes persisted tickets to the flight topic with single-replica
//! acknowledgment. `publish` is fire-and-forget from the caller's point of
//! view: any send failure lands the record in the durable backlog instead of
//! propagating, and the reconciler redelivers it later. The record was
//! already committed to Postgres before reaching this point, so absorbing
//! the failure never loses data.

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::cache::RedisCache;
use crate::config::KafkaConfig;
use crate::error::Result;
use crate::metrics;
use crate::models::FlightTicketRecord;

/// Publish a single ticket, reporting failure to the caller. The backlog
/// reconciler works against this seam so its delete-on-success decision can
/// be exercised without a broker.
#[async_trait]
pub trait TicketPublisher: Send + Sync {
    async fn try_publish(&self, record: &FlightTicketRecord) -> Result<()>;
}

pub struct FlightDataProducer {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
    cache: RedisCache,
}

impl FlightDataProducer {
    pub fn new(config: &KafkaConfig, cache: RedisCache) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.request_timeout_ms.to_string())
            // one broker replica must acknowledge the write
            .set("acks", "1")
            .create()?;

        Ok(Self {
            producer,
            topic: config.flight_topic.clone(),
            send_timeout: Duration::from_millis(config.request_timeout_ms),
            cache,
        })
    }

    /// Publish a ticket, absorbing any failure into the backlog. Ingestion
    /// callers are never told about publish failures.
    pub async fn publish(&self, record: &FlightTicketRecord) {
        match self.try_publish(record).await {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    ticket_id = %record.id,
                    error = %e,
                    "Publish failed, writing ticket to backlog"
                );
                metrics::record_backlogged();
                if let Err(backlog_err) = self.cache.push_backlog(record).await {
                    // The ticket is still committed in Postgres; only the
                    // automatic redelivery path is lost until re-ingestion.
                    error!(
                        ticket_id = %record.id,
                        error = %backlog_err,
                        "Failed to write ticket to backlog"
                    );
                }
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl TicketPublisher for FlightDataProducer {
    /// Publish without backlog absorption, so callers can tell redelivery
    /// success from failure.
    async fn try_publish(&self, record: &FlightTicketRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let key = record.id.to_string();

        let delivery = self
            .producer
            .send(
                FutureRecord::to(&self.topic).key(&key).payload(&payload),
                self.send_timeout,
            )
            .await;

        match delivery {
            Ok((partition, offset)) => {
                metrics::record_published();
                debug!(
                    ticket_id = %record.id,
                    topic = %self.topic,
                    partition = partition,
                    offset = offset,
                    "Published flight ticket"
                );
                Ok(())
            }
            Err((e, _)) => Err(e.into()),
        }
    }
}
