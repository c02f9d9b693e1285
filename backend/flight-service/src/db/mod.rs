//! Database access layer
//!
//! Connection pooling plus repositories for airports and flight tickets.
//! Repository functions take `impl PgExecutor` so the same queries run
//! against the pool or inside an open transaction.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub mod airport_repo;
pub mod flight_repo;

/// Create the Postgres connection pool
pub async fn create_pool(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await
}

/// Run pending sqlx migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
