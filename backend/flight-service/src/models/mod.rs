//! Data structures for flight tickets and airports
//!
//! Wire payloads keep the camelCase field names downstream consumers already
//! depend on, so the serde renames here are part of the bus contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;

/// Airport reference record, keyed by IATA code
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Airport {
    pub iata_code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Candidate airport attributes supplied alongside an ingested ticket.
/// Used to create the airport when it does not exist yet, or to refresh
/// its attributes (last-writer-wins) when it does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirportData {
    pub iata_code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl AirportData {
    pub fn validate(&self) -> Result<(), AppError> {
        if !is_valid_iata_code(&self.iata_code) {
            return Err(AppError::Validation(format!(
                "'{}' is not a valid 3-letter IATA code",
                self.iata_code
            )));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Airport {} requires a name",
                self.iata_code
            )));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AppError::Validation(format!(
                "Airport {} latitude {} out of range [-90, 90]",
                self.iata_code, self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AppError::Validation(format!(
                "Airport {} longitude {} out of range [-180, 180]",
                self.iata_code, self.longitude
            )));
        }
        Ok(())
    }
}

/// Persisted flight ticket row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FlightTicket {
    pub id: Uuid,
    pub origin: String,
    pub destination: String,
    pub airline: String,
    pub flight_num: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flight ticket as published on the bus and cached: the ticket plus the
/// resolved airport records it references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightTicketRecord {
    pub id: Uuid,
    pub origin: String,
    pub destination: String,
    pub airline: String,
    pub flight_num: String,
    pub origin_airport: Airport,
    pub destination_airport: Airport,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlightTicketRecord {
    pub fn from_parts(ticket: FlightTicket, origin: Airport, destination: Airport) -> Self {
        Self {
            id: ticket.id,
            origin: ticket.origin,
            destination: ticket.destination,
            airline: ticket.airline,
            flight_num: ticket.flight_num,
            origin_airport: origin,
            destination_airport: destination,
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
        }
    }
}

/// Candidate flight ticket as submitted for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlightTicket {
    pub origin: String,
    pub destination: String,
    pub airline: String,
    pub flight_num: String,
    #[serde(default)]
    pub origin_airport: Option<AirportData>,
    #[serde(default)]
    pub destination_airport: Option<AirportData>,
}

impl CreateFlightTicket {
    /// Validate the candidate before any write. Collects every violation so
    /// the caller gets one complete error string per record.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();

        if !is_valid_iata_code(&self.origin) {
            errors.push(format!(
                "Origin '{}' must be a valid 3-letter IATA code",
                self.origin
            ));
        }
        if !is_valid_iata_code(&self.destination) {
            errors.push(format!(
                "Destination '{}' must be a valid 3-letter IATA code",
                self.destination
            ));
        }
        if self.origin == self.destination {
            errors.push("Origin and destination must be different".to_string());
        }
        if !is_valid_airline_code(&self.airline) {
            errors.push(format!(
                "Airline '{}' must be a valid 2-character code",
                self.airline
            ));
        }
        if !is_valid_flight_num(&self.flight_num) {
            errors.push(format!(
                "Flight number '{}' must be alphanumeric and up to 10 characters",
                self.flight_num
            ));
        }

        if let Some(ref airport) = self.origin_airport {
            if let Err(AppError::Validation(msg)) = airport.validate() {
                errors.push(msg);
            }
        }
        if let Some(ref airport) = self.destination_airport {
            if let Err(AppError::Validation(msg)) = airport.validate() {
                errors.push(msg);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors.join("; ")))
        }
    }
}

/// Exactly 3 uppercase ASCII letters
pub fn is_valid_iata_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Exactly 2 uppercase letters or digits
pub fn is_valid_airline_code(code: &str) -> bool {
    code.len() == 2
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// 1 to 10 uppercase letters or digits
pub fn is_valid_flight_num(num: &str) -> bool {
    (1..=10).contains(&num.len())
        && num
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Overall outcome of a batch ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Succeeded,
    Partial,
    Failed,
}

/// Aggregated outcome of one `ingest_batch` call. Returned to the caller,
/// never persisted.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub successful_tickets: Vec<FlightTicketRecord>,
    pub errors: Vec<String>,
}

impl IngestionResult {
    pub fn merge(&mut self, other: IngestionResult) {
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
        self.successful_tickets.extend(other.successful_tickets);
        self.errors.extend(other.errors);
    }

    pub fn status(&self) -> IngestionStatus {
        match (self.success_count, self.failure_count) {
            (_, 0) => IngestionStatus::Succeeded,
            (0, _) => IngestionStatus::Failed,
            _ => IngestionStatus::Partial,
        }
    }
}

/// One page of flight tickets plus the total row count
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPage {
    pub tickets: Vec<FlightTicketRecord>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(origin: &str, destination: &str) -> CreateFlightTicket {
        CreateFlightTicket {
            origin: origin.to_string(),
            destination: destination.to_string(),
            airline: "AA".to_string(),
            flight_num: "AA123".to_string(),
            origin_airport: None,
            destination_airport: None,
        }
    }

    #[test]
    fn valid_ticket_passes() {
        assert!(candidate("LAX", "JFK").validate().is_ok());
    }

    #[test]
    fn two_letter_code_is_rejected() {
        let err = candidate("XX", "JFK").validate().unwrap_err();
        assert!(err.to_string().contains("Validation"));
        assert!(err.to_string().contains("XX"));
    }

    #[test]
    fn same_origin_and_destination_is_rejected() {
        let err = candidate("LAX", "LAX").validate().unwrap_err();
        assert!(err.to_string().contains("must be different"));
    }

    #[test]
    fn lowercase_iata_code_is_rejected() {
        assert!(!is_valid_iata_code("lax"));
        assert!(is_valid_iata_code("LAX"));
        assert!(!is_valid_iata_code("LAXX"));
    }

    #[test]
    fn airline_and_flight_num_formats() {
        assert!(is_valid_airline_code("A2"));
        assert!(!is_valid_airline_code("AAA"));
        assert!(is_valid_flight_num("AA123"));
        assert!(!is_valid_flight_num(""));
        assert!(!is_valid_flight_num("AA123456789"));
        assert!(!is_valid_flight_num("aa123"));
    }

    #[test]
    fn validation_collects_every_violation() {
        let err = candidate("XX", "XX").validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Origin"));
        assert!(msg.contains("Destination"));
        assert!(msg.contains("must be different"));
    }

    #[test]
    fn airport_coordinates_are_bounded() {
        let mut airport = AirportData {
            iata_code: "LAX".to_string(),
            name: "Los Angeles International".to_string(),
            latitude: 33.9425,
            longitude: -118.408,
            city: None,
            country: None,
        };
        assert!(airport.validate().is_ok());

        airport.latitude = 91.0;
        assert!(airport.validate().is_err());

        airport.latitude = 33.9425;
        airport.longitude = -181.0;
        assert!(airport.validate().is_err());
    }

    #[test]
    fn ingestion_status_tracks_counts() {
        let mut result = IngestionResult::default();
        assert_eq!(result.status(), IngestionStatus::Succeeded);

        result.success_count = 2;
        assert_eq!(result.status(), IngestionStatus::Succeeded);

        result.failure_count = 1;
        assert_eq!(result.status(), IngestionStatus::Partial);

        result.success_count = 0;
        assert_eq!(result.status(), IngestionStatus::Failed);
    }

    #[test]
    fn merge_aggregates_in_order() {
        let mut total = IngestionResult::default();
        total.merge(IngestionResult {
            success_count: 1,
            failure_count: 0,
            successful_tickets: vec![],
            errors: vec![],
        });
        total.merge(IngestionResult {
            success_count: 0,
            failure_count: 2,
            successful_tickets: vec![],
            errors: vec!["a".to_string(), "b".to_string()],
        });
        assert_eq!(total.success_count, 1);
        assert_eq!(total.failure_count, 2);
        assert_eq!(total.errors, vec!["a", "b"]);
    }

    #[test]
    fn wire_payload_uses_camel_case() {
        let airport = Airport {
            iata_code: "JFK".to_string(),
            name: "John F. Kennedy International".to_string(),
            latitude: 40.6413,
            longitude: -73.7781,
            city: Some("New York".to_string()),
            country: Some("US".to_string()),
        };
        let json = serde_json::to_value(&airport).unwrap();
        assert!(json.get("iataCode").is_some());
        assert!(json.get("iata_code").is_none());
    }
}
