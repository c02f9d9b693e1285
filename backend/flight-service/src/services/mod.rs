//! Business logic layer
//!
//! - `airports`: get-or-create airport resolution with layered caching
//! - `flights`: chunked, transactional batch ingestion and read paths

pub mod airports;
pub mod flights;

pub use airports::AirportService;
pub use flights::FlightService;
