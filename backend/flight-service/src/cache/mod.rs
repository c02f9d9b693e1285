//! Redis cache and durable publish backlog
//!
//! Read-through caching for point lookups and listings, plus the backlog
//! keys that hold committed tickets whose Kafka publish failed. Backlog
//! keys carry no TTL: they are the delivery guarantee, not a cache.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::FlightTicketRecord;

/// Shared Redis connection manager guarded by a Tokio mutex
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Cache TTLs per key namespace, in seconds
pub const FLIGHT_TICKET_TTL_SECS: u64 = 3_600;
pub const AIRPORT_TTL_SECS: u64 = 86_400;
pub const ALL_TICKETS_TTL_SECS: u64 = 60;
pub const SEARCH_TTL_SECS: u64 = 300;

const BACKLOG_PREFIX: &str = "flight_data_backlog:";

pub fn flight_ticket_key(id: Uuid) -> String {
    format!("flight_ticket:{}", id)
}

pub fn airport_key(iata_code: &str) -> String {
    format!("airport:{}", iata_code)
}

pub fn backlog_key(id: Uuid) -> String {
    format!("{}{}", BACKLOG_PREFIX, id)
}

pub fn all_tickets_key(page: u32, limit: u32) -> String {
    format!("all_tickets:{}:{}", page, limit)
}

pub fn search_key(origin: &str, destination: &str) -> String {
    format!("search:{}:{}", origin, destination)
}

/// Redis-backed cache shared by the ingestion pipeline, read paths and the
/// backlog reconciler.
#[derive(Clone)]
pub struct RedisCache {
    manager: SharedConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    /// Wrap an existing connection manager (used by tests and callers that
    /// already hold one).
    pub fn from_manager(manager: SharedConnectionManager) -> Self {
        Self { manager }
    }

    /// Fetch and deserialize a cached value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.manager.lock().await;
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Serialize and store a value, with a TTL unless `ttl_secs` is None
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.manager.lock().await;
        match ttl_secs {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, payload, ttl).await?,
            None => conn.set::<_, _, ()>(key, payload).await?,
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.lock().await;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// SCAN (not KEYS) every key matching the pattern
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.lock().await;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    // Backlog operations. Entries are keyed by ticket id; the publisher
    // appends on failure, the reconciler deletes on successful redelivery.

    pub async fn push_backlog(&self, record: &FlightTicketRecord) -> Result<()> {
        self.set_json(&backlog_key(record.id), record, None).await
    }

    /// Every backlogged record, paired with its key for later deletion.
    /// Entries that fail to deserialize are logged and skipped rather than
    /// wedging the whole sweep.
    pub async fn backlog_entries(&self) -> Result<Vec<(String, FlightTicketRecord)>> {
        let keys = self.scan_keys(&format!("{}*", BACKLOG_PREFIX)).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get_json::<FlightTicketRecord>(&key).await {
                Ok(Some(record)) => entries.push((key, record)),
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable backlog entry");
                }
            }
        }
        Ok(entries)
    }

    pub async fn remove_backlog(&self, key: &str) -> Result<()> {
        self.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_namespaces_match_the_bus_contract() {
        let id = Uuid::nil();
        assert_eq!(
            flight_ticket_key(id),
            "flight_ticket:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            backlog_key(id),
            "flight_data_backlog:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(airport_key("LAX"), "airport:LAX");
        assert_eq!(all_tickets_key(2, 10), "all_tickets:2:10");
        assert_eq!(search_key("LAX", "JFK"), "search:LAX:JFK");
    }

    #[test]
    fn ttls_per_namespace() {
        assert_eq!(FLIGHT_TICKET_TTL_SECS, 3_600);
        assert_eq!(AIRPORT_TTL_SECS, 86_400);
        assert_eq!(ALL_TICKETS_TTL_SECS, 60);
        assert_eq!(SEARCH_TTL_SECS, 300);
    }
}
