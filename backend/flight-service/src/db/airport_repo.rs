use crate::models::Airport;
use sqlx::PgExecutor;

/// Fetch an airport by IATA code
pub async fn find_by_iata<'e>(
    executor: impl PgExecutor<'e>,
    iata_code: &str,
) -> Result<Option<Airport>, sqlx::Error> {
    sqlx::query_as::<_, Airport>(
        r#"
        SELECT iata_code, name, latitude, longitude, city, country
        FROM airports
        WHERE iata_code = $1
        "#,
    )
    .bind(iata_code)
    .fetch_optional(executor)
    .await
}

/// Try to insert a new airport. Returns `None` when a concurrent writer
/// already created the row for this code; the caller refetches the winner.
/// ON CONFLICT DO NOTHING keeps the enclosing transaction usable, which a
/// raw unique violation would not.
pub async fn try_insert<'e>(
    executor: impl PgExecutor<'e>,
    airport: &Airport,
) -> Result<Option<Airport>, sqlx::Error> {
    sqlx::query_as::<_, Airport>(
        r#"
        INSERT INTO airports (iata_code, name, latitude, longitude, city, country)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (iata_code) DO NOTHING
        RETURNING iata_code, name, latitude, longitude, city, country
        "#,
    )
    .bind(&airport.iata_code)
    .bind(&airport.name)
    .bind(airport.latitude)
    .bind(airport.longitude)
    .bind(&airport.city)
    .bind(&airport.country)
    .fetch_optional(executor)
    .await
}

/// Last-writer-wins attribute update for an existing airport
pub async fn update<'e>(
    executor: impl PgExecutor<'e>,
    airport: &Airport,
) -> Result<Airport, sqlx::Error> {
    sqlx::query_as::<_, Airport>(
        r#"
        UPDATE airports
        SET name = $2,
            latitude = $3,
            longitude = $4,
            city = COALESCE($5, city),
            country = COALESCE($6, country)
        WHERE iata_code = $1
        RETURNING iata_code, name, latitude, longitude, city, country
        "#,
    )
    .bind(&airport.iata_code)
    .bind(&airport.name)
    .bind(airport.latitude)
    .bind(airport.longitude)
    .bind(&airport.city)
    .bind(&airport.country)
    .fetch_one(executor)
    .await
}

/// All airports, used to (re)build the in-process cache
pub async fn list_all<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<Airport>, sqlx::Error> {
    sqlx::query_as::<_, Airport>(
        r#"
        SELECT iata_code, name, latitude, longitude, city, country
        FROM airports
        ORDER BY iata_code
        "#,
    )
    .fetch_all(executor)
    .await
}
