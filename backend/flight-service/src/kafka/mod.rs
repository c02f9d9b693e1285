//! Kafka integration
//!
//! - `producer`: publishes flight tickets, absorbing failures into the
//!   durable backlog
//! - `consumer`: topic-subscribed consumer with per-message retry and
//!   dead-letter routing

pub mod consumer;
pub mod producer;

pub use consumer::{ConsumedMessage, EventConsumer, MessageHandler, RETRY_COUNT_HEADER};
pub use producer::{FlightDataProducer, TicketPublisher};
