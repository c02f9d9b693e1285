//! Backlog reconciliation sweep
//!
//! Every interval, re-attempt delivery for every backlogged ticket: a
//! successful publish deletes the entry, a failure leaves it for the next
//! sweep. There is no per-entry retry counter; the sweep interval itself
//! bounds retry frequency. Entries were committed to Postgres before they
//! entered the backlog, so nothing here can lose data.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::cache::RedisCache;
use crate::kafka::{FlightDataProducer, TicketPublisher};
use crate::metrics;
use crate::models::FlightTicketRecord;
use crate::notifications::NotificationHub;

pub fn start_backlog_reconciler(
    cache: RedisCache,
    producer: Arc<FlightDataProducer>,
    notifications: NotificationHub,
    sweep_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!(
        interval_secs = sweep_interval.as_secs(),
        "Starting backlog reconciler"
    );

    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        // the first tick fires immediately; skip it so a restart does not
        // double-publish a backlog the previous run just drained
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Backlog reconciler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match run_sweep(&cache, producer.as_ref()).await {
                        Ok(processed) => {
                            notifications.notify(
                                "backlogProcessed",
                                &serde_json::json!({ "processedCount": processed }),
                            );
                        }
                        Err(e) => {
                            warn!(error = %e, "Backlog sweep failed");
                        }
                    }
                }
            }
        }
    })
}

/// One sweep over the whole backlog. Returns how many entries were
/// redelivered and removed.
pub async fn run_sweep(
    cache: &RedisCache,
    producer: &dyn TicketPublisher,
) -> crate::error::Result<usize> {
    let entries = cache.backlog_entries().await?;
    metrics::BACKLOG_SIZE.set(entries.len() as f64);

    if entries.is_empty() {
        debug!("Backlog empty, nothing to reconcile");
        return Ok(0);
    }

    let total = entries.len();
    let delivered = deliver_entries(producer, entries).await;

    let mut processed = 0;
    for key in delivered {
        if let Err(e) = cache.remove_backlog(&key).await {
            // The entry will be republished next sweep; duplicates are
            // acceptable, loss is not.
            warn!(key = %key, error = %e, "Redelivered but failed to remove backlog entry");
        } else {
            processed += 1;
            metrics::BACKLOG_RECONCILED_TOTAL.inc();
        }
    }

    metrics::BACKLOG_SIZE.set((total - processed) as f64);
    info!(
        total = total,
        processed = processed,
        remaining = total - processed,
        "Backlog sweep finished"
    );
    Ok(processed)
}

/// Attempt redelivery for every entry. Only the keys whose publish succeeded
/// come back for removal; a failed entry stays in the backlog for the next
/// sweep.
async fn deliver_entries(
    producer: &dyn TicketPublisher,
    entries: Vec<(String, FlightTicketRecord)>,
) -> Vec<String> {
    let mut delivered = Vec::with_capacity(entries.len());
    for (key, record) in entries {
        match producer.try_publish(&record).await {
            Ok(()) => delivered.push(key),
            Err(e) => {
                warn!(
                    ticket_id = %record.id,
                    error = %e,
                    "Backlog redelivery failed, leaving entry for next sweep"
                );
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backlog_key;
    use crate::error::AppError;
    use crate::models::Airport;
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    /// Fails publishes for one ticket id, succeeds for the rest
    struct FlakyPublisher {
        fail_for: Uuid,
    }

    #[async_trait]
    impl TicketPublisher for FlakyPublisher {
        async fn try_publish(&self, record: &FlightTicketRecord) -> crate::error::Result<()> {
            if record.id == self.fail_for {
                Err(AppError::TransientBus("broker unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn airport(code: &str) -> Airport {
        Airport {
            iata_code: code.to_string(),
            name: format!("{} International", code),
            latitude: 0.0,
            longitude: 0.0,
            city: None,
            country: None,
        }
    }

    fn record(id: Uuid) -> FlightTicketRecord {
        let now = Utc::now();
        FlightTicketRecord {
            id,
            origin: "LAX".to_string(),
            destination: "JFK".to_string(),
            airline: "AA".to_string(),
            flight_num: "AA123".to_string(),
            origin_airport: airport("LAX"),
            destination_airport: airport("JFK"),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn delivered_entries_are_released_and_failed_ones_retained() {
        let delivered_id = Uuid::new_v4();
        let stuck_id = Uuid::new_v4();
        let publisher = FlakyPublisher { fail_for: stuck_id };

        let delivered = deliver_entries(
            &publisher,
            vec![
                (backlog_key(delivered_id), record(delivered_id)),
                (backlog_key(stuck_id), record(stuck_id)),
            ],
        )
        .await;

        // only the delivered key is eligible for removal; the stuck entry
        // stays for the next sweep
        assert_eq!(delivered, vec![backlog_key(delivered_id)]);
    }

    #[tokio::test]
    async fn a_healthy_broker_drains_the_whole_backlog() {
        let publisher = FlakyPublisher {
            fail_for: Uuid::nil(),
        };
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let entries = ids.iter().map(|&id| (backlog_key(id), record(id))).collect();

        let delivered = deliver_entries(&publisher, entries).await;
        assert_eq!(delivered.len(), ids.len());
    }
}
