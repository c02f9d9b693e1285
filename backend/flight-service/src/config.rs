//! Configuration management for Flight Service
//!
//! All configuration is loaded from environment variables with development
//! defaults, so the service starts against a local Postgres/Redis/Kafka
//! stack with no extra setup.

use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Cache (Redis) configuration
    pub cache: CacheConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// Batch ingestion tuning
    pub ingest: IngestConfig,
    /// Background job cadences
    pub scheduler: SchedulerConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    pub max_connections: u32,
}

/// Cache (Redis) configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL
    pub url: String,
}

/// Kafka configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka brokers, comma separated in the environment
    pub brokers: String,
    /// Client id reported to the brokers
    pub client_id: String,
    /// Consumer group id, fixed per deployment
    pub group_id: String,
    /// Topic flight tickets are published to
    pub flight_topic: String,
    /// Per-message retry budget before dead-lettering
    pub consumer_max_retries: u32,
    /// Connection-level retry budget before the consumer gives up
    pub consumer_max_connect_attempts: u32,
    /// Producer send timeout
    pub request_timeout_ms: u64,
}

/// Batch ingestion tuning
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Records per chunk (one transaction per chunk)
    pub batch_size: usize,
    /// Chunks processed concurrently
    pub worker_count: usize,
    /// Bound on a single chunk transaction
    pub tx_timeout_secs: u64,
}

/// Background job cadences
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Backlog reconciliation sweep interval
    pub backlog_sweep_interval_secs: u64,
    /// Airport in-process cache refresh interval.
    /// Deployments have run this hourly and every minute; it is a tunable,
    /// not a contract.
    pub airport_refresh_interval_secs: u64,
}

impl IngestConfig {
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_timeout_secs)
    }
}

impl SchedulerConfig {
    pub fn backlog_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.backlog_sweep_interval_secs)
    }

    pub fn airport_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.airport_refresh_interval_secs)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/aether".to_string()),
                max_connections: env_parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            cache: CacheConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            kafka: KafkaConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                client_id: std::env::var("KAFKA_CLIENT_ID")
                    .unwrap_or_else(|_| "aether-backend".to_string()),
                group_id: std::env::var("KAFKA_GROUP_ID")
                    .unwrap_or_else(|_| "aether-consumer-group".to_string()),
                flight_topic: std::env::var("KAFKA_FLIGHT_TOPIC")
                    .unwrap_or_else(|_| "flight-data-ingested".to_string()),
                consumer_max_retries: env_parsed("CONSUMER_MAX_RETRIES", 3)?,
                consumer_max_connect_attempts: env_parsed("CONSUMER_MAX_CONNECT_ATTEMPTS", 5)?,
                request_timeout_ms: env_parsed("KAFKA_REQUEST_TIMEOUT_MS", 5_000)?,
            },
            ingest: IngestConfig {
                batch_size: env_parsed("INGEST_BATCH_SIZE", 500)?,
                worker_count: env_parsed("INGEST_WORKER_COUNT", 4)?,
                tx_timeout_secs: env_parsed("INGEST_TX_TIMEOUT_SECS", 30)?,
            },
            scheduler: SchedulerConfig {
                backlog_sweep_interval_secs: env_parsed("BACKLOG_SWEEP_INTERVAL_SECS", 300)?,
                airport_refresh_interval_secs: env_parsed("AIRPORT_REFRESH_INTERVAL_SECS", 3_600)?,
            },
        })
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse()
            .map_err(|e| format!("Failed to parse {}='{}': {}", key, val, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_a_local_stack() {
        // Only asserts on keys this test does not set, so it stays safe
        // under parallel test execution.
        let config = Config::from_env().expect("default config should load");
        assert_eq!(config.ingest.batch_size, 500);
        assert_eq!(config.ingest.worker_count, 4);
        assert_eq!(config.kafka.consumer_max_retries, 3);
        assert_eq!(config.scheduler.backlog_sweep_interval_secs, 300);
        assert_eq!(
            config.scheduler.backlog_sweep_interval(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn parse_failure_reports_the_offending_key() {
        std::env::set_var("FLIGHT_TEST_BAD_NUMBER", "not-a-number");
        let result: Result<u32, String> = env_parsed("FLIGHT_TEST_BAD_NUMBER", 1);
        let err = result.unwrap_err();
        assert!(err.contains("FLIGHT_TEST_BAD_NUMBER"));
        std::env::remove_var("FLIGHT_TEST_BAD_NUMBER");
    }
}
