//! Servicio del agregado Trip
//!
//! Creación, actualización de campos y transiciones de estado. Toda
//! escritura confirma viaje + evento en la misma transacción; los
//! mensajes al broker salen después del commit.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::event_log::{new_event, status_payload, EventLog};
use super::status_machine::{can_transition, milestone_for};
use crate::broker::{topics, EventBus};
use crate::models::event::event_types;
use crate::models::{
    CreateTripRequest, EventOptions, LocationInput, NewTrip, NewTripStop, StopType, Trip,
    TripEvent, TripFilters, TripStatus, TripStop, UpdateTripRequest,
};
use crate::repositories::{StatusWrite, TripStore};
use crate::utils::errors::{not_found_error, validation_error, AppError, AppResult};
use crate::utils::validation::{field_errors, validate_location, validate_time_window};

/// Metadatos opcionales de una transición
#[derive(Debug, Clone, Default)]
pub struct TransitionOptions {
    pub triggered_by: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl TransitionOptions {
    pub fn triggered_by(actor: impl Into<String>) -> Self {
        Self {
            triggered_by: Some(actor.into()),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Clone)]
pub struct TripService {
    trips: Arc<dyn TripStore>,
    events: EventLog,
    bus: EventBus,
}

fn check_location(field: &'static str, location: &LocationInput) -> AppResult<()> {
    location.validate()?;
    validate_location(location).map_err(|e| AppError::Validation(field_errors(field, e)))
}

fn check_window(
    field: &'static str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> AppResult<()> {
    validate_time_window(start, end).map_err(|e| AppError::Validation(field_errors(field, e)))
}

/// pickup = 1, intermedias en orden, delivery = N
fn sequence_stops(
    request: &CreateTripRequest,
    pickup: &LocationInput,
    delivery: &LocationInput,
) -> Vec<NewTripStop> {
    let mut stops = Vec::with_capacity(request.intermediate_stops.len() + 2);
    stops.push(NewTripStop {
        sequence: 1,
        stop_type: StopType::Pickup,
        location: pickup.clone(),
        window_start: request.pickup_window_start,
        window_end: request.pickup_window_end,
        notes: None,
    });

    for stop in &request.intermediate_stops {
        stops.push(NewTripStop {
            sequence: stops.len() as i32 + 1,
            stop_type: StopType::Intermediate,
            location: stop.location.clone(),
            window_start: stop.window_start,
            window_end: stop.window_end,
            notes: stop.notes.clone(),
        });
    }

    stops.push(NewTripStop {
        sequence: stops.len() as i32 + 1,
        stop_type: StopType::Delivery,
        location: delivery.clone(),
        window_start: request.delivery_window_start,
        window_end: request.delivery_window_end,
        notes: None,
    });
    stops
}

impl TripService {
    pub fn new(trips: Arc<dyn TripStore>, events: EventLog, bus: EventBus) -> Self {
        Self { trips, events, bus }
    }

    /// Crea un viaje en `planned` con sus paradas. Idempotente por `dispatch_id`.
    pub async fn create(&self, request: CreateTripRequest) -> AppResult<Trip> {
        let pickup = request
            .pickup
            .clone()
            .ok_or_else(|| validation_error("pickup", "Pickup location is required"))?;
        let delivery = request
            .delivery
            .clone()
            .ok_or_else(|| validation_error("delivery", "Delivery location is required"))?;

        check_location("pickup", &pickup)?;
        check_location("delivery", &delivery)?;
        for stop in &request.intermediate_stops {
            check_location("intermediate_stops", &stop.location)?;
            check_window("intermediate_stops", stop.window_start, stop.window_end)?;
        }
        check_window("pickup_window", request.pickup_window_start, request.pickup_window_end)?;
        check_window(
            "delivery_window",
            request.delivery_window_start,
            request.delivery_window_end,
        )?;
        if matches!(request.planned_miles, Some(miles) if miles < 0.0) {
            return Err(validation_error("planned_miles", "Planned miles cannot be negative"));
        }

        if let Some(dispatch_id) = request.dispatch_id {
            if let Some(existing) = self.trips.find_by_dispatch(dispatch_id).await? {
                info!("♻️ Viaje {} ya existe para dispatch {}", existing.id, dispatch_id);
                return Ok(existing);
            }
        }

        let now = Utc::now();
        let stops = sequence_stops(&request, &pickup, &delivery);
        let trip = NewTrip {
            id: Uuid::new_v4(),
            order_id: request.order_id,
            dispatch_id: request.dispatch_id,
            driver_id: request.driver_id,
            unit_id: request.unit_id,
            pickup,
            delivery,
            pickup_window_start: request.pickup_window_start,
            pickup_window_end: request.pickup_window_end,
            delivery_window_start: request.delivery_window_start,
            delivery_window_end: request.delivery_window_end,
            planned_start: request.planned_start,
            planned_miles: request.planned_miles,
            notes: request.notes,
            stops,
            created_at: now,
        };
        let event = new_event(
            trip.id,
            event_types::STATUS_CHANGE,
            EventOptions {
                payload: Some(status_payload(TripStatus::Planned, Some("created"), None)),
                occurred_at: Some(now),
                ..Default::default()
            },
        );

        let outcome = self.trips.insert_trip(trip, event).await?;
        let trip = outcome.trip;
        let Some(event) = outcome.event else {
            // Otra señal de asignación ganó la carrera del índice único
            info!("♻️ Viaje {} ya existe para dispatch {:?}", trip.id, trip.dispatch_id);
            return Ok(trip);
        };

        info!("✅ Viaje creado: {} (dispatch {:?})", trip.id, trip.dispatch_id);

        self.events.announce(&event);
        self.bus.emit(
            topics::TRIP_CREATED,
            json!({
                "trip_id": trip.id,
                "order_id": trip.order_id,
                "dispatch_id": trip.dispatch_id,
                "driver_id": trip.driver_id,
                "unit_id": trip.unit_id,
                "status": trip.status,
            }),
        );

        Ok(trip)
    }

    /// Aplica una transición validada por la máquina de estados
    pub async fn transition_status(
        &self,
        trip_id: Uuid,
        next: TripStatus,
        options: TransitionOptions,
    ) -> AppResult<Trip> {
        let trip = self.get(trip_id).await?;
        let current = trip.status;

        if current == next {
            debug!("Viaje {} ya está en {}, sin cambios", trip_id, next);
            return Ok(trip);
        }

        if !can_transition(current, next) {
            warn!("🚫 Transición rechazada para viaje {}: {} -> {}", trip_id, current, next);
            return Err(AppError::IllegalTransition {
                from: current,
                to: next,
            });
        }

        let (trip, event) = self
            .write_status(trip_id, current, next, true, &options)
            .await
            .map_err(|e| {
                if e.is_illegal_transition() {
                    warn!("🚫 Estado de viaje {} cambió durante la transición a {}", trip_id, next);
                }
                e
            })?;
        info!("🔄 Viaje {}: {} -> {}", trip_id, current, next);

        self.events.announce(&event);
        self.bus.emit(
            topics::TRIP_STATUS_CHANGED,
            json!({
                "trip_id": trip_id,
                "from": current,
                "to": next,
                "triggered_by": options.triggered_by,
                "reason": options.reason,
            }),
        );

        Ok(trip)
    }

    /// Escritura directa de estado sin pasar por la tabla de transiciones.
    /// Solo para overrides administrativos y degradaciones de integraciones.
    pub async fn force_status(
        &self,
        trip_id: Uuid,
        status: TripStatus,
        options: TransitionOptions,
    ) -> AppResult<Trip> {
        let current = self.get(trip_id).await?.status;
        let (trip, event) = self
            .write_status(trip_id, current, status, false, &options)
            .await?;
        warn!("⚠️ Estado forzado en viaje {}: {} -> {}", trip_id, current, status);

        self.events.announce(&event);
        self.bus.emit(
            topics::TRIP_STATUS_CHANGED,
            json!({
                "trip_id": trip_id,
                "from": current,
                "to": status,
                "triggered_by": options.triggered_by,
                "reason": options.reason,
                "forced": true,
            }),
        );

        Ok(trip)
    }

    /// Cierre administrativo: válido desde cualquier estado
    pub async fn close(&self, trip_id: Uuid, triggered_by: Option<String>) -> AppResult<Trip> {
        let current = self.get(trip_id).await?.status;
        let options = TransitionOptions {
            triggered_by,
            reason: Some("closed".to_string()),
            occurred_at: None,
        };

        let (trip, event) = self
            .write_status(trip_id, current, TripStatus::Closed, false, &options)
            .await?;
        info!("🏁 Viaje {} cerrado (estaba en {})", trip_id, current);

        self.events.announce(&event);
        self.bus.emit(
            topics::TRIP_CLOSED,
            json!({
                "trip_id": trip_id,
                "previous_status": current,
                "closed_at": trip.closed_at.map(|t| t.to_rfc3339()),
                "triggered_by": options.triggered_by,
            }),
        );

        Ok(trip)
    }

    async fn write_status(
        &self,
        trip_id: Uuid,
        from: TripStatus,
        to: TripStatus,
        guarded: bool,
        options: &TransitionOptions,
    ) -> AppResult<(Trip, TripEvent)> {
        let at = options.occurred_at.unwrap_or_else(Utc::now);
        let write = StatusWrite {
            expected: guarded.then_some(from),
            status: to,
            milestone: milestone_for(to),
            at,
        };
        let event = new_event(
            trip_id,
            event_types::STATUS_CHANGE,
            EventOptions {
                payload: Some(status_payload(
                    to,
                    options.reason.as_deref(),
                    Some(json!({ "from": from })),
                )),
                triggered_by: options.triggered_by.clone(),
                occurred_at: Some(at),
                source: None,
            },
        );

        self.trips.write_status(trip_id, write, event).await
    }

    /// Actualiza solo los campos de planificación presentes en el patch
    pub async fn update_fields(&self, trip_id: Uuid, patch: UpdateTripRequest) -> AppResult<Trip> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get(trip_id).await;
        }

        let current = self.get(trip_id).await?;
        check_window(
            "pickup_window",
            patch.pickup_window_start.or(current.pickup_window_start),
            patch.pickup_window_end.or(current.pickup_window_end),
        )?;
        check_window(
            "delivery_window",
            patch.delivery_window_start.or(current.delivery_window_start),
            patch.delivery_window_end.or(current.delivery_window_end),
        )?;

        let event = new_event(
            trip_id,
            event_types::TRIP_UPDATED,
            EventOptions {
                payload: Some(json!({ "fields": patch.provided_fields() })),
                ..Default::default()
            },
        );
        let (trip, event) = self.trips.update_fields(trip_id, &patch, event).await?;
        debug!("✏️ Viaje {} actualizado: {:?}", trip_id, patch.provided_fields());

        self.events.announce(&event);
        Ok(trip)
    }

    pub async fn get(&self, trip_id: Uuid) -> AppResult<Trip> {
        self.trips
            .find_trip(trip_id)
            .await?
            .ok_or_else(|| not_found_error("Trip", &trip_id.to_string()))
    }

    pub async fn list(&self, filters: &TripFilters) -> AppResult<Vec<Trip>> {
        self.trips.list_trips(filters).await
    }

    /// Viaje más reciente para un dispatch, si existe
    pub async fn get_by_dispatch_id(&self, dispatch_id: Uuid) -> AppResult<Option<Trip>> {
        self.trips.find_by_dispatch(dispatch_id).await
    }

    pub async fn stops(&self, trip_id: Uuid) -> AppResult<Vec<TripStop>> {
        self.get(trip_id).await?;
        self.trips.stops_for_trip(trip_id).await
    }

    pub async fn add_note(
        &self,
        trip_id: Uuid,
        note: &str,
        author: Option<String>,
    ) -> AppResult<TripEvent> {
        self.get(trip_id).await?;
        self.events.record_note(trip_id, note, author).await
    }

    pub async fn history(&self, trip_id: Uuid) -> AppResult<Vec<TripEvent>> {
        self.get(trip_id).await?;
        self.events.get_trip_events(trip_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StopInput;

    #[test]
    fn test_sequence_stops_pickup_first_delivery_last() {
        let pickup = LocationInput::new("Dock A");
        let delivery = LocationInput::new("Dock Z");
        let request = CreateTripRequest {
            intermediate_stops: vec![
                StopInput::from(LocationInput::new("Cross-dock 1")),
                StopInput::from(LocationInput::new("Cross-dock 2")),
            ],
            ..Default::default()
        };

        let stops = sequence_stops(&request, &pickup, &delivery);
        let sequences: Vec<i32> = stops.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(stops[0].stop_type, StopType::Pickup);
        assert_eq!(stops[1].stop_type, StopType::Intermediate);
        assert_eq!(stops[3].stop_type, StopType::Delivery);
        assert_eq!(stops[3].location.address, "Dock Z");
    }

    #[test]
    fn test_sequence_stops_without_intermediates() {
        let request = CreateTripRequest::default();
        let stops = sequence_stops(
            &request,
            &LocationInput::new("A"),
            &LocationInput::new("B"),
        );
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[1].sequence, 2);
    }
}
