//! Almacén en memoria
//!
//! Misma semántica que los repositorios PostgreSQL: un solo mutex async
//! hace de transacción y de lock de fila, así que cada operación es
//! atómica y serializable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::types::Json;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    EventStore, ExceptionStore, InsertOutcome, LocationOutcome, StatusWrite, TripStore,
};
use crate::models::{
    LocationUpdate, NewTrip, NewTripEvent, ResolveOutcome, TelemetryRecord, TrackingSnapshot,
    Trip, TripEvent, TripException, TripFilters, TripStatus, TripStop, UpdateTripRequest,
};
use crate::services::status_machine::{StopAnchor, StopStamp};
use crate::utils::errors::{not_found_error, AppError, AppResult};

#[derive(Default)]
struct MemoryState {
    trips: HashMap<Uuid, Trip>,
    stops: HashMap<Uuid, Vec<TripStop>>,
    telemetry: Vec<TelemetryRecord>,
    events: Vec<TripEvent>,
    next_event_id: i64,
    exceptions: Vec<TripException>,
}

impl MemoryState {
    fn push_event(&mut self, event: NewTripEvent) -> TripEvent {
        self.next_event_id += 1;
        let stored = TripEvent {
            id: self.next_event_id,
            trip_id: event.trip_id,
            event_type: event.event_type,
            payload: Json(if event.payload.is_null() { json!({}) } else { event.payload }),
            triggered_by: event.triggered_by,
            source: event.source,
            occurred_at: event.occurred_at,
        };
        self.events.push(stored.clone());
        stored
    }

    fn trip_mut(&mut self, id: Uuid) -> AppResult<&mut Trip> {
        self.trips
            .get_mut(&id)
            .ok_or_else(|| not_found_error("Trip", &id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Más reciente primero, como `ORDER BY created_at DESC`
fn newest_first(mut trips: Vec<Trip>) -> Vec<Trip> {
    trips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    trips
}

fn build_trip(new: &NewTrip) -> Trip {
    Trip {
        id: new.id,
        order_id: new.order_id,
        dispatch_id: new.dispatch_id,
        driver_id: new.driver_id,
        unit_id: new.unit_id,
        status: TripStatus::Planned,
        pickup_address: new.pickup.address.clone(),
        pickup_lat: new.pickup.lat,
        pickup_lng: new.pickup.lng,
        delivery_address: new.delivery.address.clone(),
        delivery_lat: new.delivery.lat,
        delivery_lng: new.delivery.lng,
        pickup_window_start: new.pickup_window_start,
        pickup_window_end: new.pickup_window_end,
        delivery_window_start: new.delivery_window_start,
        delivery_window_end: new.delivery_window_end,
        last_lat: None,
        last_lng: None,
        last_ping_at: None,
        planned_start: new.planned_start,
        actual_start: None,
        pickup_arrival: None,
        pickup_departure: None,
        delivery_arrival: None,
        delivery_departure: None,
        completed_at: None,
        closed_at: None,
        planned_miles: new.planned_miles,
        actual_miles: 0.0,
        estimated_fuel: None,
        route_history: Json(Vec::new()),
        notes: new.notes.clone(),
        created_at: new.created_at,
        updated_at: new.created_at,
    }
}

fn stamp(slot: &mut Option<DateTime<Utc>>, at: DateTime<Utc>) {
    if slot.is_none() {
        *slot = Some(at);
    }
}

#[async_trait]
impl TripStore for InMemoryStore {
    async fn insert_trip(&self, new: NewTrip, event: NewTripEvent) -> AppResult<InsertOutcome> {
        let mut state = self.state.lock().await;

        if let Some(dispatch_id) = new.dispatch_id {
            let existing = state
                .trips
                .values()
                .filter(|t| t.dispatch_id == Some(dispatch_id))
                .max_by_key(|t| t.created_at)
                .cloned();
            if let Some(trip) = existing {
                return Ok(InsertOutcome {
                    trip,
                    created: false,
                    event: None,
                });
            }
        }

        let trip = build_trip(&new);
        let stops = new
            .stops
            .iter()
            .map(|stop| TripStop {
                id: Uuid::new_v4(),
                trip_id: trip.id,
                sequence: stop.sequence,
                stop_type: stop.stop_type,
                address: stop.location.address.clone(),
                lat: stop.location.lat,
                lng: stop.location.lng,
                window_start: stop.window_start,
                window_end: stop.window_end,
                arrived_at: None,
                departed_at: None,
                notes: stop.notes.clone(),
            })
            .collect();

        state.stops.insert(trip.id, stops);
        state.trips.insert(trip.id, trip.clone());
        let event = state.push_event(event);

        Ok(InsertOutcome {
            trip,
            created: true,
            event: Some(event),
        })
    }

    async fn find_trip(&self, id: Uuid) -> AppResult<Option<Trip>> {
        Ok(self.state.lock().await.trips.get(&id).cloned())
    }

    async fn find_by_dispatch(&self, dispatch_id: Uuid) -> AppResult<Option<Trip>> {
        let state = self.state.lock().await;
        Ok(state
            .trips
            .values()
            .filter(|t| t.dispatch_id == Some(dispatch_id))
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn list_trips(&self, filters: &TripFilters) -> AppResult<Vec<Trip>> {
        let state = self.state.lock().await;
        let trips = state
            .trips
            .values()
            .filter(|t| filters.matches(t))
            .cloned()
            .collect();
        Ok(newest_first(trips))
    }

    async fn list_active_trips(&self) -> AppResult<Vec<Trip>> {
        let state = self.state.lock().await;
        let trips = state
            .trips
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        Ok(newest_first(trips))
    }

    async fn latest_active_for_driver(&self, driver_id: Uuid) -> AppResult<Option<Trip>> {
        let state = self.state.lock().await;
        Ok(state
            .trips
            .values()
            .filter(|t| t.driver_id == driver_id && !t.status.is_terminal())
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn stops_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripStop>> {
        let state = self.state.lock().await;
        let mut stops = state.stops.get(&trip_id).cloned().unwrap_or_default();
        stops.sort_by_key(|s| s.sequence);
        Ok(stops)
    }

    async fn write_status(
        &self,
        trip_id: Uuid,
        write: StatusWrite,
        event: NewTripEvent,
    ) -> AppResult<(Trip, TripEvent)> {
        let mut state = self.state.lock().await;

        let trip = state.trip_mut(trip_id)?;
        if let Some(expected) = write.expected {
            if trip.status != expected {
                return Err(AppError::IllegalTransition {
                    from: trip.status,
                    to: write.status,
                });
            }
        }
        trip.status = write.status;
        trip.updated_at = write.at;
        if let Some(milestone) = write.milestone {
            use crate::services::status_machine::Milestone::*;
            let slot = match milestone {
                ActualStart => &mut trip.actual_start,
                PickupArrival => &mut trip.pickup_arrival,
                PickupDeparture => &mut trip.pickup_departure,
                DeliveryArrival => &mut trip.delivery_arrival,
                DeliveryDeparture => &mut trip.delivery_departure,
                Completed => &mut trip.completed_at,
                Closed => &mut trip.closed_at,
            };
            stamp(slot, write.at);
        }
        let trip = trip.clone();

        if let Some((anchor, which)) = write.milestone.and_then(|m| m.stop_stamp()) {
            if let Some(stops) = state.stops.get_mut(&trip_id) {
                let target = match anchor {
                    StopAnchor::Pickup => stops.iter_mut().find(|s| s.sequence == 1),
                    StopAnchor::Delivery => stops.iter_mut().max_by_key(|s| s.sequence),
                };
                if let Some(stop) = target {
                    match which {
                        StopStamp::ArrivedAt => stamp(&mut stop.arrived_at, write.at),
                        StopStamp::DepartedAt => stamp(&mut stop.departed_at, write.at),
                    }
                }
            }
        }

        let event = state.push_event(event);
        Ok((trip, event))
    }

    async fn update_fields(
        &self,
        trip_id: Uuid,
        patch: &UpdateTripRequest,
        event: NewTripEvent,
    ) -> AppResult<(Trip, TripEvent)> {
        let mut state = self.state.lock().await;
        let trip = state.trip_mut(trip_id)?;

        if patch.pickup_window_start.is_some() {
            trip.pickup_window_start = patch.pickup_window_start;
        }
        if patch.pickup_window_end.is_some() {
            trip.pickup_window_end = patch.pickup_window_end;
        }
        if patch.delivery_window_start.is_some() {
            trip.delivery_window_start = patch.delivery_window_start;
        }
        if patch.delivery_window_end.is_some() {
            trip.delivery_window_end = patch.delivery_window_end;
        }
        if patch.planned_start.is_some() {
            trip.planned_start = patch.planned_start;
        }
        if patch.notes.is_some() {
            trip.notes = patch.notes.clone();
        }
        if patch.planned_miles.is_some() {
            trip.planned_miles = patch.planned_miles;
        }
        if patch.estimated_fuel.is_some() {
            trip.estimated_fuel = patch.estimated_fuel;
        }
        trip.updated_at = event.occurred_at;
        let trip = trip.clone();

        let event = state.push_event(event);
        Ok((trip, event))
    }

    async fn apply_location(
        &self,
        trip_id: Uuid,
        update: &LocationUpdate,
        history_cap: usize,
    ) -> AppResult<LocationOutcome> {
        // El guard se mantiene durante todo el read-modify-write
        let mut state = self.state.lock().await;
        let received_at = Utc::now();

        let trip = state.trip_mut(trip_id)?;
        let snapshot = TrackingSnapshot {
            last_lat: trip.last_lat,
            last_lng: trip.last_lng,
            last_ping_at: trip.last_ping_at,
            actual_miles: trip.actual_miles,
            route_history: trip.route_history.0.clone(),
        };
        let advance = snapshot.advance(update, received_at, history_cap);

        if advance.applied {
            trip.last_lat = advance.snapshot.last_lat;
            trip.last_lng = advance.snapshot.last_lng;
            trip.last_ping_at = advance.snapshot.last_ping_at;
            trip.actual_miles = advance.snapshot.actual_miles;
            trip.route_history = Json(advance.snapshot.route_history.clone());
            trip.updated_at = received_at;
        }
        let trip = trip.clone();

        let telemetry_id = Uuid::new_v4();
        state.telemetry.push(TelemetryRecord {
            id: telemetry_id,
            trip_id,
            driver_id: update.driver_id,
            lat: update.lat,
            lng: update.lng,
            speed: update.speed,
            heading: update.heading,
            odometer: update.odometer,
            fuel_level: update.fuel_level,
            source: update.source.clone(),
            recorded_at: advance.point.timestamp,
            out_of_order: advance.out_of_order(),
        });

        Ok(LocationOutcome {
            trip,
            advance,
            telemetry_id,
        })
    }

    async fn telemetry_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TelemetryRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .telemetry
            .iter()
            .filter(|r| r.trip_id == trip_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.recorded_at);
        Ok(records)
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn insert_event(&self, event: NewTripEvent) -> AppResult<TripEvent> {
        Ok(self.state.lock().await.push_event(event))
    }

    async fn events_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.trip_id == trip_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn recent_events(&self, limit: i64) -> AppResult<Vec<TripEvent>> {
        let state = self.state.lock().await;
        let mut events = state.events.clone();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }
}

#[async_trait]
impl ExceptionStore for InMemoryStore {
    async fn insert_exception(&self, exception: TripException) -> AppResult<TripException> {
        let mut state = self.state.lock().await;
        state.exceptions.push(exception.clone());
        Ok(exception)
    }

    async fn find_exception(&self, id: Uuid) -> AppResult<Option<TripException>> {
        let state = self.state.lock().await;
        Ok(state.exceptions.iter().find(|e| e.id == id).cloned())
    }

    async fn resolve_exception(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<ResolveOutcome>> {
        let mut state = self.state.lock().await;
        let Some(exception) = state.exceptions.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };

        let newly_resolved = !exception.resolved;
        if newly_resolved {
            exception.resolved = true;
            exception.resolved_at = Some(at);
        }

        Ok(Some(ResolveOutcome {
            exception: exception.clone(),
            newly_resolved,
        }))
    }

    async fn active_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripException>> {
        self.active_for_trips(&[trip_id]).await
    }

    async fn active_for_trips(&self, trip_ids: &[Uuid]) -> AppResult<Vec<TripException>> {
        let state = self.state.lock().await;
        let mut exceptions: Vec<_> = state
            .exceptions
            .iter()
            .filter(|e| !e.resolved && trip_ids.contains(&e.trip_id))
            .cloned()
            .collect();
        exceptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(exceptions)
    }
}
