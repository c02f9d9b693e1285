//! Batch ingestion coordinator and flight read paths
//!
//! `ingest_batch` splits the incoming records into fixed-size chunks and
//! processes chunks with bounded parallelism. Each chunk runs in one
//! transaction with a savepoint per record, so a bad record rolls back only
//! itself and the chunk still commits the survivors. Publishing and caching
//! happen after commit, in a spawned task, and can never roll back what was
//! written.

use futures::stream::{self, StreamExt};
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{
    self, RedisCache, ALL_TICKETS_TTL_SECS, FLIGHT_TICKET_TTL_SECS, SEARCH_TTL_SECS,
};
use crate::config::IngestConfig;
use crate::db::flight_repo;
use crate::error::{AppError, Result};
use crate::kafka::FlightDataProducer;
use crate::metrics;
use crate::models::{
    Airport, CreateFlightTicket, FlightTicket, FlightTicketRecord, IngestionResult, TicketPage,
};
use crate::notifications::NotificationHub;
use crate::services::AirportService;

pub struct FlightService {
    pool: PgPool,
    cache: RedisCache,
    producer: Arc<FlightDataProducer>,
    airports: Arc<AirportService>,
    notifications: NotificationHub,
    ingest: IngestConfig,
}

impl FlightService {
    pub fn new(
        pool: PgPool,
        cache: RedisCache,
        producer: Arc<FlightDataProducer>,
        airports: Arc<AirportService>,
        notifications: NotificationHub,
        ingest: IngestConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            producer,
            airports,
            notifications,
            ingest,
        }
    }

    /// Ingest a batch of candidate tickets. Always returns a result; partial
    /// failures are itemized in `errors`, never raised.
    pub async fn ingest_batch(&self, records: Vec<CreateFlightTicket>) -> IngestionResult {
        let chunk_size = self.ingest.batch_size.max(1);
        let chunks: Vec<Vec<CreateFlightTicket>> =
            records.chunks(chunk_size).map(|c| c.to_vec()).collect();
        let chunk_count = chunks.len();

        let results = stream::iter(chunks)
            .map(|chunk| self.process_chunk(chunk))
            .buffered(self.ingest.worker_count.max(1))
            .collect::<Vec<IngestionResult>>()
            .await;

        let mut total = IngestionResult::default();
        for result in results {
            total.merge(result);
        }

        metrics::record_ingested(total.success_count, total.failure_count);
        info!(
            chunks = chunk_count,
            success = total.success_count,
            failed = total.failure_count,
            status = ?total.status(),
            "Batch ingestion finished"
        );

        self.notifications.notify(
            "bulkIngestionResult",
            &serde_json::json!({
                "successCount": total.success_count,
                "failureCount": total.failure_count,
                "status": total.status(),
            }),
        );

        total
    }

    /// One chunk: a bounded transaction, then post-commit publish/cache.
    /// A chunk-level failure (begin/commit error, timeout) fails every
    /// record in the chunk; nothing is retried automatically.
    async fn process_chunk(&self, chunk: Vec<CreateFlightTicket>) -> IngestionResult {
        let chunk_len = chunk.len();

        let outcome = timeout(self.ingest.tx_timeout(), self.run_chunk_transaction(chunk)).await;

        match outcome {
            Ok(Ok(result)) => {
                if !result.successful_tickets.is_empty() {
                    self.spawn_publish_and_cache(result.successful_tickets.clone());
                }
                result
            }
            Ok(Err(e)) => {
                error!(error = %e, records = chunk_len, "Chunk transaction failed");
                chunk_failed(chunk_len, &format!("Chunk processing failed: {}", e))
            }
            Err(_) => {
                // Dropping the in-flight future drops the transaction,
                // which rolls it back.
                error!(records = chunk_len, "Chunk transaction timed out");
                chunk_failed(chunk_len, "Chunk processing failed: transaction timed out")
            }
        }
    }

    async fn run_chunk_transaction(
        &self,
        chunk: Vec<CreateFlightTicket>,
    ) -> Result<IngestionResult> {
        let mut tx = self.pool.begin().await?;
        let mut chunk_cache: HashMap<String, Airport> = HashMap::new();
        let mut result = IngestionResult::default();

        for candidate in &chunk {
            match self
                .process_record(&mut tx, &mut chunk_cache, candidate)
                .await
            {
                Ok(record) => {
                    result.success_count += 1;
                    result.successful_tickets.push(record);
                }
                Err(e) => {
                    result.failure_count += 1;
                    result.errors.push(format!(
                        "Failed to process ticket {} {}->{}: {}",
                        candidate.flight_num, candidate.origin, candidate.destination, e
                    ));
                }
            }
        }

        tx.commit().await?;

        // Rows in the chunk cache are committed now; publish them into the
        // shared caches.
        if let Err(e) = self.airports.promote(chunk_cache.into_values()).await {
            warn!(error = %e, "Failed to promote committed airports into cache");
        }

        Ok(result)
    }

    /// One record inside its own savepoint. Airport creation happens inside
    /// the same savepoint so ticket and airports commit or roll back
    /// together. The chunk cache only absorbs airports from records that
    /// reached their savepoint commit.
    async fn process_record(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        chunk_cache: &mut HashMap<String, Airport>,
        candidate: &CreateFlightTicket,
    ) -> Result<FlightTicketRecord> {
        candidate.validate()?;

        let mut record_cache = chunk_cache.clone();
        let mut sp = tx.begin().await?;

        let outcome = async {
            let origin = self
                .airports
                .resolve_in_tx(
                    &mut sp,
                    &mut record_cache,
                    &candidate.origin,
                    candidate.origin_airport.as_ref(),
                )
                .await?;
            let destination = self
                .airports
                .resolve_in_tx(
                    &mut sp,
                    &mut record_cache,
                    &candidate.destination,
                    candidate.destination_airport.as_ref(),
                )
                .await?;
            let ticket = flight_repo::insert(
                &mut *sp,
                &candidate.origin,
                &candidate.destination,
                &candidate.airline,
                &candidate.flight_num,
            )
            .await?;
            Ok::<_, AppError>(FlightTicketRecord::from_parts(ticket, origin, destination))
        }
        .await;

        match outcome {
            Ok(record) => {
                sp.commit().await?;
                *chunk_cache = record_cache;
                Ok(record)
            }
            Err(e) => {
                sp.rollback().await?;
                Err(e)
            }
        }
    }

    /// Post-commit side effects, detached from the ingestion caller. The
    /// producer absorbs publish failures into the backlog; cache failures
    /// only cost a later miss.
    fn spawn_publish_and_cache(&self, records: Vec<FlightTicketRecord>) {
        let producer = Arc::clone(&self.producer);
        let cache = self.cache.clone();
        let notifications = self.notifications.clone();

        tokio::spawn(async move {
            for record in &records {
                producer.publish(record).await;

                let key = cache::flight_ticket_key(record.id);
                if let Err(e) = cache
                    .set_json(&key, record, Some(FLIGHT_TICKET_TTL_SECS))
                    .await
                {
                    warn!(ticket_id = %record.id, error = %e, "Failed to cache flight ticket");
                }
            }
            notifications.notify("newFlightTickets", &records);
        });
    }

    /// Point lookup, read-through cached for an hour
    pub async fn get_flight_ticket(&self, id: Uuid) -> Result<FlightTicketRecord> {
        let key = cache::flight_ticket_key(id);
        if let Some(record) = self.cache.get_json::<FlightTicketRecord>(&key).await? {
            return Ok(record);
        }

        let ticket = flight_repo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Flight ticket with ID {} not found", id)))?;

        let record = self.hydrate(ticket).await?;
        self.cache
            .set_json(&key, &record, Some(FLIGHT_TICKET_TTL_SECS))
            .await?;
        Ok(record)
    }

    /// Route search, cached for five minutes
    pub async fn search_flights(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<Vec<FlightTicketRecord>> {
        let key = cache::search_key(origin, destination);
        if let Some(records) = self.cache.get_json::<Vec<FlightTicketRecord>>(&key).await? {
            return Ok(records);
        }

        let tickets = flight_repo::find_by_route(&self.pool, origin, destination).await?;
        let mut records = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            records.push(self.hydrate(ticket).await?);
        }

        self.cache
            .set_json(&key, &records, Some(SEARCH_TTL_SECS))
            .await?;
        Ok(records)
    }

    /// Paginated listing, cached for a minute
    pub async fn list_flight_tickets(&self, page: u32, limit: u32) -> Result<TicketPage> {
        let key = cache::all_tickets_key(page, limit);
        if let Some(result) = self.cache.get_json::<TicketPage>(&key).await? {
            return Ok(result);
        }

        let (tickets, total) = flight_repo::list_paginated(&self.pool, page, limit).await?;
        let mut records = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            records.push(self.hydrate(ticket).await?);
        }

        let result = TicketPage {
            tickets: records,
            total,
        };
        self.cache
            .set_json(&key, &result, Some(ALL_TICKETS_TTL_SECS))
            .await?;
        Ok(result)
    }

    /// Attach the referenced airport records to a ticket row. The foreign
    /// keys guarantee both lookups succeed.
    async fn hydrate(&self, ticket: FlightTicket) -> Result<FlightTicketRecord> {
        let origin = self.airports.get_airport(&ticket.origin).await?;
        let destination = self.airports.get_airport(&ticket.destination).await?;
        Ok(FlightTicketRecord::from_parts(ticket, origin, destination))
    }
}

fn chunk_failed(records: usize, message: &str) -> IngestionResult {
    IngestionResult {
        success_count: 0,
        failure_count: records,
        successful_tickets: Vec::new(),
        errors: vec![message.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_failure_fails_every_record_with_one_error() {
        let result = chunk_failed(250, "Chunk processing failed: transaction timed out");
        assert_eq!(result.failure_count, 250);
        assert_eq!(result.success_count, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("timed out"));
    }
}
