use crate::models::FlightTicket;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

/// Insert a flight ticket; the id and timestamps come back from the database
pub async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    origin: &str,
    destination: &str,
    airline: &str,
    flight_num: &str,
) -> Result<FlightTicket, sqlx::Error> {
    sqlx::query_as::<_, FlightTicket>(
        r#"
        INSERT INTO flight_tickets (origin, destination, airline, flight_num)
        VALUES ($1, $2, $3, $4)
        RETURNING id, origin, destination, airline, flight_num, created_at, updated_at
        "#,
    )
    .bind(origin)
    .bind(destination)
    .bind(airline)
    .bind(flight_num)
    .fetch_one(executor)
    .await
}

/// Fetch one ticket by id
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<FlightTicket>, sqlx::Error> {
    sqlx::query_as::<_, FlightTicket>(
        r#"
        SELECT id, origin, destination, airline, flight_num, created_at, updated_at
        FROM flight_tickets
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// All tickets on a route
pub async fn find_by_route(
    pool: &PgPool,
    origin: &str,
    destination: &str,
) -> Result<Vec<FlightTicket>, sqlx::Error> {
    sqlx::query_as::<_, FlightTicket>(
        r#"
        SELECT id, origin, destination, airline, flight_num, created_at, updated_at
        FROM flight_tickets
        WHERE origin = $1 AND destination = $2
        ORDER BY created_at DESC
        "#,
    )
    .bind(origin)
    .bind(destination)
    .fetch_all(pool)
    .await
}

/// One page of tickets plus the total row count
pub async fn list_paginated(
    pool: &PgPool,
    page: u32,
    limit: u32,
) -> Result<(Vec<FlightTicket>, i64), sqlx::Error> {
    let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);

    let tickets = sqlx::query_as::<_, FlightTicket>(
        r#"
        SELECT id, origin, destination, airline, flight_num, created_at, updated_at
        FROM flight_tickets
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(i64::from(limit))
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total = sqlx::query("SELECT COUNT(*) FROM flight_tickets")
        .fetch_one(pool)
        .await?
        .get::<i64, _>(0);

    Ok((tickets, total))
}
