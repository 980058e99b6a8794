use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::EventStore;
use crate::models::{NewTripEvent, TripEvent};
use crate::utils::errors::AppResult;

/// Inserta un evento sobre una conexión ya abierta (posiblemente dentro
/// de la transacción que cambia el viaje)
pub(crate) async fn insert_event_with(
    conn: &mut PgConnection,
    event: &NewTripEvent,
) -> AppResult<TripEvent> {
    let stored = sqlx::query_as::<_, TripEvent>(
        r#"
        INSERT INTO trip_events (trip_id, event_type, payload, triggered_by, source, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(event.trip_id)
    .bind(&event.event_type)
    .bind(Json(&event.payload))
    .bind(&event.triggered_by)
    .bind(&event.source)
    .bind(event.occurred_at)
    .fetch_one(conn)
    .await?;

    Ok(stored)
}

/// Eventos del viaje: solo INSERT y SELECT, nunca UPDATE/DELETE
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventRepository {
    async fn insert_event(&self, event: NewTripEvent) -> AppResult<TripEvent> {
        let mut conn = self.pool.acquire().await?;
        insert_event_with(&mut *conn, &event).await
    }

    async fn events_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripEvent>> {
        let events = sqlx::query_as::<_, TripEvent>(
            "SELECT * FROM trip_events WHERE trip_id = $1 ORDER BY occurred_at ASC, id ASC",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn recent_events(&self, limit: i64) -> AppResult<Vec<TripEvent>> {
        let events = sqlx::query_as::<_, TripEvent>(
            "SELECT * FROM trip_events ORDER BY occurred_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
