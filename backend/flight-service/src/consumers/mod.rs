//! Topic handlers for the event consumer

use async_trait::async_trait;
use tracing::info;

use crate::cache::{self, RedisCache, FLIGHT_TICKET_TTL_SECS};
use crate::error::{AppError, Result};
use crate::kafka::{ConsumedMessage, MessageHandler};
use crate::models::FlightTicketRecord;
use crate::notifications::NotificationHub;

/// Handles records on the flight topic: validates the payload, warms the
/// ticket cache and forwards a notification. Other instances of this
/// service (and other producers) publish to the same topic, so this is what
/// keeps a fleet's caches converged.
pub struct FlightDataHandler {
    cache: RedisCache,
    notifications: NotificationHub,
}

impl FlightDataHandler {
    pub fn new(cache: RedisCache, notifications: NotificationHub) -> Self {
        Self {
            cache,
            notifications,
        }
    }
}

#[async_trait]
impl MessageHandler for FlightDataHandler {
    async fn handle(&self, message: &ConsumedMessage) -> Result<()> {
        let record: FlightTicketRecord =
            serde_json::from_slice(&message.payload).map_err(|e| {
                AppError::Validation(format!("Malformed flight ticket payload: {}", e))
            })?;

        self.cache
            .set_json(
                &cache::flight_ticket_key(record.id),
                &record,
                Some(FLIGHT_TICKET_TTL_SECS),
            )
            .await?;

        info!(
            ticket_id = %record.id,
            origin = %record.origin,
            destination = %record.destination,
            "Processed flight ticket from bus"
        );
        self.notifications.notify("flightTicketIngested", &record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_is_a_validation_error() {
        let err = serde_json::from_slice::<FlightTicketRecord>(b"not json")
            .map_err(|e| AppError::Validation(format!("Malformed flight ticket payload: {}", e)))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
