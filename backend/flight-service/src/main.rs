use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flight_service::cache::RedisCache;
use flight_service::consumers::FlightDataHandler;
use flight_service::db;
use flight_service::jobs::{start_airport_cache_refresh, start_backlog_reconciler};
use flight_service::kafka::{EventConsumer, FlightDataProducer};
use flight_service::notifications::NotificationHub;
use flight_service::services::AirportService;
use flight_service::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,flight_service=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    info!("Starting flight-service");

    let pool = db::create_pool(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to Postgres")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let cache = RedisCache::connect(&config.cache.url)
        .await
        .context("failed to connect to Redis")?;

    let notifications = NotificationHub::default();

    let producer = Arc::new(
        FlightDataProducer::new(&config.kafka, cache.clone())
            .context("failed to create Kafka producer")?,
    );

    let airports = Arc::new(AirportService::new(pool.clone(), cache.clone()));
    match airports.refresh_local_cache().await {
        Ok(count) => info!(airports = count, "Seeded airport cache"),
        Err(e) => warn!(error = %e, "Could not seed airport cache, continuing cold"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = start_backlog_reconciler(
        cache.clone(),
        Arc::clone(&producer),
        notifications.clone(),
        config.scheduler.backlog_sweep_interval(),
        shutdown_rx.clone(),
    );

    let cache_refresh = start_airport_cache_refresh(
        Arc::clone(&airports),
        config.scheduler.airport_refresh_interval(),
        shutdown_rx.clone(),
    );

    let mut consumer =
        EventConsumer::new(&config.kafka).context("failed to create Kafka consumer")?;
    consumer.register_handler(
        &config.kafka.flight_topic,
        Arc::new(FlightDataHandler::new(cache.clone(), notifications.clone())),
    );

    let consumer_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            if let Err(e) = consumer.run(shutdown_rx).await {
                // connection retry budget exhausted; this needs an operator
                error!(error = %e, "Event consumer terminated");
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(reconciler, cache_refresh, consumer_handle);

    info!("flight-service stopped");
    Ok(())
}
