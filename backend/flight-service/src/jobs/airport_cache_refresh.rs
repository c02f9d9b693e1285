//! Periodic airport cache refresh
//!
//! Rebuilds the in-process airport cache from Postgres so rows written by
//! other instances become visible between explicit promotions. The cadence
//! is configuration; deployments have run it hourly and every minute.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use crate::services::AirportService;

pub fn start_airport_cache_refresh(
    airports: Arc<AirportService>,
    refresh_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!(
        interval_secs = refresh_interval.as_secs(),
        "Starting airport cache refresh job"
    );

    tokio::spawn(async move {
        let mut ticker = interval(refresh_interval);
        ticker.tick().await; // immediate first tick; startup already seeded the cache

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Airport cache refresh stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match airports.refresh_local_cache().await {
                        Ok(count) => {
                            info!(airports = count, "Airport cache refreshed");
                        }
                        Err(e) => {
                            warn!(error = %e, "Airport cache refresh failed");
                        }
                    }
                }
            }
        }
    })
}
