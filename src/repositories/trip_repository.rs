use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::event_repository::insert_event_with;
use super::{InsertOutcome, LocationOutcome, StatusWrite, TripStore};
use crate::models::{
    LocationPoint, LocationUpdate, NewTrip, NewTripEvent, TelemetryRecord, TrackingSnapshot, Trip,
    TripEvent, TripFilters, TripStatus, TripStop, UpdateTripRequest,
};
use crate::services::status_machine::{StopAnchor, StopStamp};
use crate::utils::errors::{not_found_error, AppError, AppResult};

/// Columnas de seguimiento leídas con `FOR UPDATE`
#[derive(Debug, sqlx::FromRow)]
struct TrackingRow {
    last_lat: Option<f64>,
    last_lng: Option<f64>,
    last_ping_at: Option<DateTime<Utc>>,
    actual_miles: f64,
    route_history: Json<Vec<LocationPoint>>,
}

impl From<TrackingRow> for TrackingSnapshot {
    fn from(row: TrackingRow) -> Self {
        Self {
            last_lat: row.last_lat,
            last_lng: row.last_lng,
            last_ping_at: row.last_ping_at,
            actual_miles: row.actual_miles,
            route_history: row.route_history.0,
        }
    }
}

pub struct PgTripRepository {
    pool: PgPool,
}

impl PgTripRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TripStore for PgTripRepository {
    async fn insert_trip(&self, new: NewTrip, event: NewTripEvent) -> AppResult<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Trip>(
            r#"
            INSERT INTO trips (
                id, order_id, dispatch_id, driver_id, unit_id, status,
                pickup_address, pickup_lat, pickup_lng,
                delivery_address, delivery_lat, delivery_lng,
                pickup_window_start, pickup_window_end,
                delivery_window_start, delivery_window_end,
                planned_start, planned_miles, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'planned', $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $19)
            ON CONFLICT (dispatch_id) WHERE dispatch_id IS NOT NULL DO NOTHING
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(new.order_id)
        .bind(new.dispatch_id)
        .bind(new.driver_id)
        .bind(new.unit_id)
        .bind(&new.pickup.address)
        .bind(new.pickup.lat)
        .bind(new.pickup.lng)
        .bind(&new.delivery.address)
        .bind(new.delivery.lat)
        .bind(new.delivery.lng)
        .bind(new.pickup_window_start)
        .bind(new.pickup_window_end)
        .bind(new.delivery_window_start)
        .bind(new.delivery_window_end)
        .bind(new.planned_start)
        .bind(new.planned_miles)
        .bind(&new.notes)
        .bind(new.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(trip) = inserted else {
            // Otro request ganó la carrera para este dispatch
            tx.rollback().await?;
            let dispatch_id = new.dispatch_id.unwrap_or_default();
            let existing = self
                .find_by_dispatch(dispatch_id)
                .await?
                .ok_or_else(|| not_found_error("Trip for dispatch", &dispatch_id.to_string()))?;
            return Ok(InsertOutcome {
                trip: existing,
                created: false,
                event: None,
            });
        };

        for stop in &new.stops {
            sqlx::query(
                r#"
                INSERT INTO trip_stops (
                    id, trip_id, sequence, stop_type, address, lat, lng,
                    window_start, window_end, notes
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(trip.id)
            .bind(stop.sequence)
            .bind(stop.stop_type)
            .bind(&stop.location.address)
            .bind(stop.location.lat)
            .bind(stop.location.lng)
            .bind(stop.window_start)
            .bind(stop.window_end)
            .bind(&stop.notes)
            .execute(&mut *tx)
            .await?;
        }

        let event = insert_event_with(&mut *tx, &event).await?;

        tx.commit().await?;

        Ok(InsertOutcome {
            trip,
            created: true,
            event: Some(event),
        })
    }

    async fn find_trip(&self, id: Uuid) -> AppResult<Option<Trip>> {
        let trip = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(trip)
    }

    async fn find_by_dispatch(&self, dispatch_id: Uuid) -> AppResult<Option<Trip>> {
        let trip = sqlx::query_as::<_, Trip>(
            "SELECT * FROM trips WHERE dispatch_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(dispatch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(trip)
    }

    async fn list_trips(&self, filters: &TripFilters) -> AppResult<Vec<Trip>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM trips WHERE TRUE");
        if let Some(status) = filters.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(driver_id) = filters.driver_id {
            builder.push(" AND driver_id = ").push_bind(driver_id);
        }
        if let Some(dispatch_id) = filters.dispatch_id {
            builder.push(" AND dispatch_id = ").push_bind(dispatch_id);
        }
        if let Some(order_id) = filters.order_id {
            builder.push(" AND order_id = ").push_bind(order_id);
        }
        builder.push(" ORDER BY created_at DESC");

        let trips = builder
            .build_query_as::<Trip>()
            .fetch_all(&self.pool)
            .await?;

        Ok(trips)
    }

    async fn list_active_trips(&self) -> AppResult<Vec<Trip>> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"
            SELECT * FROM trips
            WHERE status NOT IN ('closed', 'cancelled')
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(trips)
    }

    async fn latest_active_for_driver(&self, driver_id: Uuid) -> AppResult<Option<Trip>> {
        let trip = sqlx::query_as::<_, Trip>(
            r#"
            SELECT * FROM trips
            WHERE driver_id = $1 AND status NOT IN ('closed', 'cancelled')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(trip)
    }

    async fn stops_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripStop>> {
        let stops = sqlx::query_as::<_, TripStop>(
            "SELECT * FROM trip_stops WHERE trip_id = $1 ORDER BY sequence",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(stops)
    }

    async fn write_status(
        &self,
        trip_id: Uuid,
        write: StatusWrite,
        event: NewTripEvent,
    ) -> AppResult<(Trip, TripEvent)> {
        let mut tx = self.pool.begin().await?;

        // Las columnas salen de un enum cerrado, nunca de input externo
        let stamp = match write.milestone {
            Some(milestone) => format!(
                ", {col} = COALESCE({col}, $3)",
                col = milestone.column()
            ),
            None => String::new(),
        };
        let sql = format!(
            "UPDATE trips SET status = $2{stamp}, updated_at = $3 \
             WHERE id = $1 AND ($4::trip_status IS NULL OR status = $4) RETURNING *"
        );

        let updated = sqlx::query_as::<_, Trip>(&sql)
            .bind(trip_id)
            .bind(write.status)
            .bind(write.at)
            .bind(write.expected)
            .fetch_optional(&mut *tx)
            .await?;

        let trip = match updated {
            Some(trip) => trip,
            None => {
                // Cero filas: el viaje no existe o su estado cambió desde la validación
                let actual: Option<TripStatus> =
                    sqlx::query_scalar("SELECT status FROM trips WHERE id = $1")
                        .bind(trip_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match actual {
                    Some(from) => AppError::IllegalTransition {
                        from,
                        to: write.status,
                    },
                    None => not_found_error("Trip", &trip_id.to_string()),
                });
            }
        };

        if let Some((anchor, stamp)) = write.milestone.and_then(|m| m.stop_stamp()) {
            let col = match stamp {
                StopStamp::ArrivedAt => "arrived_at",
                StopStamp::DepartedAt => "departed_at",
            };
            let target = match anchor {
                StopAnchor::Pickup => "sequence = 1",
                StopAnchor::Delivery => {
                    "sequence = (SELECT MAX(sequence) FROM trip_stops WHERE trip_id = $1)"
                }
            };
            let sql = format!(
                "UPDATE trip_stops SET {col} = COALESCE({col}, $2) WHERE trip_id = $1 AND {target}"
            );
            sqlx::query(&sql)
                .bind(trip_id)
                .bind(write.at)
                .execute(&mut *tx)
                .await?;
        }

        let event = insert_event_with(&mut *tx, &event).await?;

        tx.commit().await?;

        Ok((trip, event))
    }

    async fn update_fields(
        &self,
        trip_id: Uuid,
        patch: &UpdateTripRequest,
        event: NewTripEvent,
    ) -> AppResult<(Trip, TripEvent)> {
        let mut tx = self.pool.begin().await?;

        let trip = sqlx::query_as::<_, Trip>(
            r#"
            UPDATE trips
            SET pickup_window_start = COALESCE($2, pickup_window_start),
                pickup_window_end = COALESCE($3, pickup_window_end),
                delivery_window_start = COALESCE($4, delivery_window_start),
                delivery_window_end = COALESCE($5, delivery_window_end),
                planned_start = COALESCE($6, planned_start),
                notes = COALESCE($7, notes),
                planned_miles = COALESCE($8, planned_miles),
                estimated_fuel = COALESCE($9, estimated_fuel),
                updated_at = $10
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(trip_id)
        .bind(patch.pickup_window_start)
        .bind(patch.pickup_window_end)
        .bind(patch.delivery_window_start)
        .bind(patch.delivery_window_end)
        .bind(patch.planned_start)
        .bind(&patch.notes)
        .bind(patch.planned_miles)
        .bind(patch.estimated_fuel)
        .bind(event.occurred_at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found_error("Trip", &trip_id.to_string()))?;

        let event = insert_event_with(&mut *tx, &event).await?;

        tx.commit().await?;

        Ok((trip, event))
    }

    async fn apply_location(
        &self,
        trip_id: Uuid,
        update: &LocationUpdate,
        history_cap: usize,
    ) -> AppResult<LocationOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TrackingRow>(
            r#"
            SELECT last_lat, last_lng, last_ping_at, actual_miles, route_history
            FROM trips
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(trip_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found_error("Trip", &trip_id.to_string()))?;

        // El reloj se lee con el lock tomado
        let received_at = Utc::now();
        let advance = TrackingSnapshot::from(row).advance(update, received_at, history_cap);
        let telemetry_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO trip_locations (
                id, trip_id, driver_id, lat, lng, speed, heading,
                odometer, fuel_level, source, recorded_at, out_of_order
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(telemetry_id)
        .bind(trip_id)
        .bind(update.driver_id)
        .bind(update.lat)
        .bind(update.lng)
        .bind(update.speed)
        .bind(update.heading)
        .bind(update.odometer)
        .bind(update.fuel_level)
        .bind(&update.source)
        .bind(advance.point.timestamp)
        .bind(advance.out_of_order())
        .execute(&mut *tx)
        .await?;

        let trip = if advance.applied {
            sqlx::query_as::<_, Trip>(
                r#"
                UPDATE trips
                SET last_lat = $2, last_lng = $3, last_ping_at = $4,
                    actual_miles = $5, route_history = $6, updated_at = $7
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(trip_id)
            .bind(advance.snapshot.last_lat)
            .bind(advance.snapshot.last_lng)
            .bind(advance.snapshot.last_ping_at)
            .bind(advance.snapshot.actual_miles)
            .bind(Json(&advance.snapshot.route_history))
            .bind(received_at)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1")
                .bind(trip_id)
                .fetch_one(&mut *tx)
                .await?
        };

        tx.commit().await?;

        Ok(LocationOutcome {
            trip,
            advance,
            telemetry_id,
        })
    }

    async fn telemetry_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TelemetryRecord>> {
        let records = sqlx::query_as::<_, TelemetryRecord>(
            "SELECT * FROM trip_locations WHERE trip_id = $1 ORDER BY recorded_at, id",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
