//! Airport resolution with layered caching
//!
//! Resolution order: per-chunk map (rows created inside the open
//! transaction), shared in-process cache (committed rows only), Postgres.
//! The in-process cache is a performance shadow of the database and is never
//! trusted over it; concurrent creation of the same code converges through
//! the unique constraint on `iata_code` (try-insert, refetch on conflict),
//! not through any application-level lock.

use dashmap::DashMap;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::cache::{self, RedisCache, AIRPORT_TTL_SECS};
use crate::db::airport_repo;
use crate::error::{AppError, Result};
use crate::models::{is_valid_iata_code, Airport, AirportData};

/// Concurrently-updatable map of committed airport rows
#[derive(Default)]
pub struct LocalAirportCache {
    entries: DashMap<String, Airport>,
}

impl LocalAirportCache {
    pub fn get(&self, iata_code: &str) -> Option<Airport> {
        self.entries.get(iata_code).map(|entry| entry.clone())
    }

    pub fn upsert(&self, airport: Airport) {
        self.entries.insert(airport.iata_code.clone(), airport);
    }

    pub fn remove(&self, iata_code: &str) {
        self.entries.remove(iata_code);
    }

    /// Swap the whole cache for a fresh snapshot
    pub fn replace_all(&self, airports: Vec<Airport>) {
        self.entries.clear();
        for airport in airports {
            self.upsert(airport);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct AirportService {
    pool: PgPool,
    cache: RedisCache,
    local: LocalAirportCache,
}

impl AirportService {
    pub fn new(pool: PgPool, cache: RedisCache) -> Self {
        Self {
            pool,
            cache,
            local: LocalAirportCache::default(),
        }
    }

    /// Get-or-create an airport inside the caller's open transaction.
    ///
    /// `chunk_cache` holds rows created earlier in the same transaction;
    /// they are not yet visible to other workers and must not leak into the
    /// shared cache until the transaction commits (see [`promote`]).
    ///
    /// When the row exists and fresh candidate attributes are supplied, the
    /// attributes are updated in place, last writer wins.
    ///
    /// [`promote`]: AirportService::promote
    pub async fn resolve_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        chunk_cache: &mut HashMap<String, Airport>,
        code: &str,
        candidate: Option<&AirportData>,
    ) -> Result<Airport> {
        if !is_valid_iata_code(code) {
            return Err(AppError::Validation(format!(
                "'{}' is not a valid 3-letter IATA code",
                code
            )));
        }

        if let Some(airport) = chunk_cache.get(code) {
            return Ok(airport.clone());
        }

        // Committed rows only; skipped when fresh attributes must be written
        if candidate.is_none() {
            if let Some(airport) = self.local.get(code) {
                chunk_cache.insert(code.to_string(), airport.clone());
                return Ok(airport);
            }
        }

        if let Some(data) = candidate {
            data.validate()?;
            if data.iata_code != code {
                return Err(AppError::Validation(format!(
                    "Airport payload code '{}' does not match ticket code '{}'",
                    data.iata_code, code
                )));
            }
        }

        let existing = airport_repo::find_by_iata(&mut **tx, code).await?;

        let airport = match (existing, candidate) {
            (Some(_), Some(data)) => {
                let updated = airport_repo::update(&mut **tx, &to_airport(data)).await?;
                debug!(iata_code = %code, "Updated existing airport attributes");
                updated
            }
            (Some(current), None) => current,
            (None, Some(data)) => {
                match airport_repo::try_insert(&mut **tx, &to_airport(data)).await? {
                    Some(created) => {
                        info!(iata_code = %code, "Created new airport");
                        created
                    }
                    // A concurrent transaction won the insert; its row is
                    // the single source of truth now.
                    None => airport_repo::find_by_iata(&mut **tx, code)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(format!(
                                "Airport {} vanished between insert and refetch",
                                code
                            ))
                        })?,
                }
            }
            (None, None) => {
                return Err(AppError::NotFound(format!(
                    "Airport with IATA code {} not found and no attributes supplied",
                    code
                )));
            }
        };

        chunk_cache.insert(code.to_string(), airport.clone());
        Ok(airport)
    }

    /// Read path: in-process cache, then Redis, then Postgres
    pub async fn get_airport(&self, iata_code: &str) -> Result<Airport> {
        if !is_valid_iata_code(iata_code) {
            return Err(AppError::Validation(format!(
                "'{}' is not a valid 3-letter IATA code",
                iata_code
            )));
        }

        if let Some(airport) = self.local.get(iata_code) {
            return Ok(airport);
        }

        let key = cache::airport_key(iata_code);
        if let Some(airport) = self.cache.get_json::<Airport>(&key).await? {
            self.local.upsert(airport.clone());
            return Ok(airport);
        }

        let airport = airport_repo::find_by_iata(&self.pool, iata_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Airport with IATA code {} not found", iata_code))
            })?;

        self.local.upsert(airport.clone());
        self.cache
            .set_json(&key, &airport, Some(AIRPORT_TTL_SECS))
            .await?;
        Ok(airport)
    }

    /// Publish committed rows into the shared caches. Called after the
    /// owning transaction commits; Redis write failures only cost a later
    /// cache miss and are logged by the caller's error path.
    pub async fn promote(&self, airports: impl IntoIterator<Item = Airport>) -> Result<()> {
        for airport in airports {
            let key = cache::airport_key(&airport.iata_code);
            self.cache
                .set_json(&key, &airport, Some(AIRPORT_TTL_SECS))
                .await?;
            self.local.upsert(airport);
        }
        Ok(())
    }

    /// Rebuild the in-process cache from the database
    pub async fn refresh_local_cache(&self) -> Result<usize> {
        let airports = airport_repo::list_all(&self.pool).await?;
        let count = airports.len();
        self.local.replace_all(airports);
        debug!(count = count, "Refreshed airport cache");
        Ok(count)
    }

    /// Manual invalidation hook
    pub async fn invalidate(&self, iata_code: &str) -> Result<()> {
        self.local.remove(iata_code);
        self.cache.delete(&cache::airport_key(iata_code)).await
    }

    pub fn cached_airport_count(&self) -> usize {
        self.local.len()
    }
}

fn to_airport(data: &AirportData) -> Airport {
    Airport {
        iata_code: data.iata_code.clone(),
        name: data.name.clone(),
        latitude: data.latitude,
        longitude: data.longitude,
        city: data.city.clone(),
        country: data.country.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn airport(code: &str, name: &str) -> Airport {
        Airport {
            iata_code: code.to_string(),
            name: name.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            city: None,
            country: None,
        }
    }

    #[test]
    fn local_cache_upsert_is_last_writer_wins() {
        let cache = LocalAirportCache::default();
        cache.upsert(airport("LAX", "Old Name"));
        cache.upsert(airport("LAX", "Los Angeles International"));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("LAX").unwrap().name,
            "Los Angeles International"
        );
    }

    #[test]
    fn replace_all_swaps_the_snapshot() {
        let cache = LocalAirportCache::default();
        cache.upsert(airport("LAX", "Los Angeles International"));
        cache.upsert(airport("JFK", "John F. Kennedy International"));

        cache.replace_all(vec![airport("SFO", "San Francisco International")]);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("LAX").is_none());
        assert!(cache.get("SFO").is_some());
    }

    #[test]
    fn remove_drops_one_entry() {
        let cache = LocalAirportCache::default();
        cache.upsert(airport("LAX", "Los Angeles International"));
        cache.remove("LAX");
        assert!(cache.is_empty());
    }
}
