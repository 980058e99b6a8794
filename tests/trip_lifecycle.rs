mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::future::join_all;
use uuid::Uuid;

use common::{create_test_app, state_with_publisher, trip_request, trip_request_with_stops};
use trip_tracking::broker::{ChannelPublisher, EventBus, FailingPublisher};
use trip_tracking::config::TrackingSettings;
use trip_tracking::models::event::event_types;
use trip_tracking::models::{
    LocationUpdate, NewTrip, NewTripEvent, StopType, TelemetryRecord, Trip, TripEvent,
    TripFilters, TripStatus, TripStop, UpdateTripRequest,
};
use trip_tracking::repositories::{
    InsertOutcome, LocationOutcome, StatusWrite, Stores, TripStore,
};
use trip_tracking::services::status_machine::allowed_transitions;
use trip_tracking::services::{EventLog, TransitionOptions, TripService};
use trip_tracking::{AppError, AppResult};

#[tokio::test]
async fn test_create_trip_sequences_stops() {
    let mut app = create_test_app();
    let trip = app
        .state
        .trips
        .create(trip_request_with_stops(&["Cross-dock Indianapolis", "Fuel stop Nashville"]))
        .await
        .unwrap();

    assert_eq!(trip.status, TripStatus::Planned);
    assert_eq!(trip.actual_miles, 0.0);

    let stops = app.state.trips.stops(trip.id).await.unwrap();
    let sequences: Vec<i32> = stops.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    assert_eq!(stops[0].stop_type, StopType::Pickup);
    assert_eq!(stops[1].stop_type, StopType::Intermediate);
    assert_eq!(stops[2].address, "Fuel stop Nashville");
    assert_eq!(stops[3].stop_type, StopType::Delivery);

    let history = app.state.trips.history(trip.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, event_types::STATUS_CHANGE);
    assert_eq!(history[0].payload.0["status"], "planned");

    let message = app.next_message("tracking.trip.created").await;
    assert_eq!(message.payload["trip_id"], trip.id.to_string());
    assert!(message.payload["timestamp"].is_string());
}

#[tokio::test]
async fn test_create_trip_requires_pickup_and_delivery() {
    let app = create_test_app();

    let mut request = trip_request(None);
    request.pickup = None;
    let err = app.state.trips.create(request).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let mut request = trip_request(None);
    request.delivery = None;
    let err = app.state.trips.create(request).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert!(app
        .state
        .trips
        .list(&TripFilters::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_create_rejects_partial_coordinates() {
    let app = create_test_app();
    let mut request = trip_request(None);
    if let Some(pickup) = request.pickup.as_mut() {
        pickup.lng = None;
    }

    let err = app.state.trips.create(request).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_create_is_idempotent_by_dispatch() {
    let app = create_test_app();
    let dispatch_id = Uuid::new_v4();

    let first = app.state.trips.create(trip_request(Some(dispatch_id))).await.unwrap();
    let second = app.state.trips.create(trip_request(Some(dispatch_id))).await.unwrap();
    assert_eq!(first.id, second.id);

    let filters = TripFilters {
        dispatch_id: Some(dispatch_id),
        ..Default::default()
    };
    assert_eq!(app.state.trips.list(&filters).await.unwrap().len(), 1);
    assert_eq!(app.state.trips.history(first.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_for_same_dispatch_yield_one_trip() {
    let app = create_test_app();
    let dispatch_id = Uuid::new_v4();

    let results = join_all((0..8).map(|_| {
        let trips = app.state.trips.clone();
        tokio::spawn(async move { trips.create(trip_request(Some(dispatch_id))).await })
    }))
    .await;

    let ids: Vec<Uuid> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap().id)
        .collect();
    assert!(ids.iter().all(|id| *id == ids[0]));

    let found = app.state.trips.get_by_dispatch_id(dispatch_id).await.unwrap();
    assert_eq!(found.map(|t| t.id), Some(ids[0]));
}

#[tokio::test]
async fn test_full_lifecycle_stamps_milestones_and_stops() {
    let app = create_test_app();
    let trip = app
        .state
        .trips
        .create(trip_request_with_stops(&["Cross-dock"]))
        .await
        .unwrap();

    let trip = app.advance_to(trip.id, TripStatus::Completed).await;
    assert!(trip.actual_start.is_some());
    assert!(trip.pickup_arrival.is_some());
    assert!(trip.pickup_departure.is_some());
    assert!(trip.delivery_arrival.is_some());
    assert!(trip.delivery_departure.is_some());
    assert!(trip.completed_at.is_some());
    assert!(trip.closed_at.is_none());

    let stops = app.state.trips.stops(trip.id).await.unwrap();
    assert!(stops[0].arrived_at.is_some());
    assert!(stops[0].departed_at.is_some());
    assert!(stops[1].arrived_at.is_none());
    assert!(stops[2].arrived_at.is_some());
    assert!(stops[2].departed_at.is_some());

    // planned + 11 transiciones
    let history = app.state.trips.history(trip.id).await.unwrap();
    assert_eq!(history.len(), 12);
    assert_eq!(history.last().unwrap().payload.0["from"], "delivered");
}

#[tokio::test]
async fn test_illegal_transition_is_rejected() {
    let mut app = create_test_app();
    let trip = app.create_trip().await;

    let err = app
        .state
        .trips
        .transition_status(trip.id, TripStatus::InTransit, TransitionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::IllegalTransition {
            from: TripStatus::Planned,
            to: TripStatus::InTransit
        }
    ));

    let unchanged = app.state.trips.get(trip.id).await.unwrap();
    assert_eq!(unchanged.status, TripStatus::Planned);
    assert_eq!(app.state.trips.history(trip.id).await.unwrap().len(), 1);

    let published = app.drain().await;
    assert!(published
        .iter()
        .all(|m| m.topic != "tracking.trip.status.changed"));
}

#[tokio::test]
async fn test_every_pair_outside_the_table_is_rejected() {
    let app = create_test_app();
    let trip = app.create_trip().await;

    for from in TripStatus::ALL {
        for to in TripStatus::ALL {
            if from == to || allowed_transitions(from).contains(&to) {
                continue;
            }
            app.state
                .trips
                .force_status(trip.id, from, TransitionOptions::triggered_by("test"))
                .await
                .unwrap();

            let result = app
                .state
                .trips
                .transition_status(trip.id, to, TransitionOptions::default())
                .await;
            assert!(
                matches!(result, Err(AppError::IllegalTransition { .. })),
                "{} -> {} should be rejected",
                from,
                to
            );
        }
    }
}

#[tokio::test]
async fn test_same_status_transition_is_a_noop() {
    let mut app = create_test_app();
    let trip = app.create_trip().await;
    app.drain().await;

    let same = app
        .state
        .trips
        .transition_status(trip.id, TripStatus::Planned, TransitionOptions::default())
        .await
        .unwrap();

    assert_eq!(same.status, TripStatus::Planned);
    assert_eq!(same.updated_at, trip.updated_at);
    assert_eq!(app.state.trips.history(trip.id).await.unwrap().len(), 1);
    assert!(app.drain().await.is_empty());
}

#[tokio::test]
async fn test_milestone_keeps_first_stamp_after_delay() {
    let app = create_test_app();
    let trip = app.create_trip().await;
    app.advance_to(trip.id, TripStatus::EnRouteToPickup).await;

    let first_arrival = Utc::now() - Duration::hours(2);
    let options = |at| TransitionOptions {
        triggered_by: Some("driver-app".to_string()),
        reason: None,
        occurred_at: Some(at),
    };

    let trips = &app.state.trips;
    trips
        .transition_status(trip.id, TripStatus::AtPickup, options(first_arrival))
        .await
        .unwrap();
    trips
        .transition_status(trip.id, TripStatus::Delayed, options(Utc::now()))
        .await
        .unwrap();
    let trip = trips
        .transition_status(trip.id, TripStatus::AtPickup, options(Utc::now()))
        .await
        .unwrap();

    assert_eq!(trip.pickup_arrival, Some(first_arrival));
    let stops = trips.stops(trip.id).await.unwrap();
    assert_eq!(stops[0].arrived_at, Some(first_arrival));
}

#[tokio::test]
async fn test_status_change_message_carries_metadata() {
    let mut app = create_test_app();
    let trip = app.create_trip().await;

    app.state
        .trips
        .transition_status(
            trip.id,
            TripStatus::Assigned,
            TransitionOptions::triggered_by("dispatcher-7").with_reason("driver confirmed"),
        )
        .await
        .unwrap();

    let message = app.next_message("tracking.trip.status.changed").await;
    assert_eq!(message.payload["trip_id"], trip.id.to_string());
    assert_eq!(message.payload["from"], "planned");
    assert_eq!(message.payload["to"], "assigned");
    assert_eq!(message.payload["triggered_by"], "dispatcher-7");
    assert_eq!(message.payload["reason"], "driver confirmed");

    let event = app.next_message("tracking.event.created").await;
    assert_eq!(event.payload["event_type"], "status.change");
}

#[tokio::test]
async fn test_broker_failure_never_fails_a_committed_transition() {
    let state = state_with_publisher(Arc::new(FailingPublisher), TrackingSettings::default());

    let trip = state.trips.create(trip_request(None)).await.unwrap();
    let trip = state
        .trips
        .transition_status(trip.id, TripStatus::Assigned, TransitionOptions::default())
        .await
        .unwrap();
    assert_eq!(trip.status, TripStatus::Assigned);

    let note = state.trips.add_note(trip.id, "trailer seal 884213", None).await;
    assert!(note.is_ok());
    assert_eq!(state.trips.history(trip.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_close_bypasses_transition_guard() {
    let mut app = create_test_app();
    let trip = app.create_trip().await;
    app.advance_to(trip.id, TripStatus::InTransit).await;

    let closed = app
        .state
        .trips
        .close(trip.id, Some("ops-admin".to_string()))
        .await
        .unwrap();
    assert_eq!(closed.status, TripStatus::Closed);
    assert!(closed.closed_at.is_some());

    let message = app.next_message("tracking.trip.closed").await;
    assert_eq!(message.payload["previous_status"], "in_transit");

    let history = app.state.trips.history(trip.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.payload.0["status"], "closed");
    assert_eq!(last.payload.0["reason"], "closed");

    // Terminal: ya no acepta transiciones normales
    let err = app
        .state
        .trips
        .transition_status(trip.id, TripStatus::Completed, TransitionOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_illegal_transition());
}

#[tokio::test]
async fn test_update_fields_only_touches_provided_fields() {
    let mut app = create_test_app();
    let trip = app.create_trip().await;
    app.drain().await;

    let updated = app
        .state
        .trips
        .update_fields(
            trip.id,
            UpdateTripRequest {
                notes: Some("Call receiver 30 min out".to_string()),
                estimated_fuel: Some(84.5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.notes.as_deref(), Some("Call receiver 30 min out"));
    assert_eq!(updated.estimated_fuel, Some(84.5));
    assert_eq!(updated.planned_miles, trip.planned_miles);
    assert_eq!(updated.status, TripStatus::Planned);

    let history = app.state.trips.history(trip.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.event_type, event_types::TRIP_UPDATED);
    assert_eq!(last.payload.0["fields"][0], "notes");
    assert_eq!(last.payload.0["fields"][1], "estimated_fuel");

    let message = app.next_message("tracking.event.created").await;
    assert_eq!(message.payload["event_type"], "trip.updated");
}

#[tokio::test]
async fn test_update_fields_with_empty_patch_returns_current_state() {
    let app = create_test_app();
    let trip = app.create_trip().await;

    let same = app
        .state
        .trips
        .update_fields(trip.id, UpdateTripRequest::default())
        .await
        .unwrap();
    assert_eq!(same.updated_at, trip.updated_at);
    assert_eq!(app.state.trips.history(trip.id).await.unwrap().len(), 1);

    let err = app
        .state
        .trips
        .update_fields(Uuid::new_v4(), UpdateTripRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_update_fields_rejects_inverted_window() {
    let app = create_test_app();
    let trip = app.create_trip().await;
    let now = Utc::now();

    let err = app
        .state
        .trips
        .update_fields(
            trip.id,
            UpdateTripRequest {
                delivery_window_start: Some(now),
                delivery_window_end: Some(now - Duration::hours(3)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_unknown_trip_is_not_found() {
    let app = create_test_app();
    let id = Uuid::new_v4();

    assert!(matches!(
        app.state.trips.get(id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        app.state
            .trips
            .transition_status(id, TripStatus::Assigned, TransitionOptions::default())
            .await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        app.state.trips.add_note(id, "hello", None).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_filters_and_notes() {
    let app = create_test_app();
    let first = app.create_trip().await;
    let second = app.create_trip().await;
    app.advance_to(second.id, TripStatus::Assigned).await;

    let assigned = app
        .state
        .trips
        .list(&TripFilters {
            status: Some(TripStatus::Assigned),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].id, second.id);

    let by_driver = app
        .state
        .trips
        .list(&TripFilters {
            driver_id: Some(first.driver_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_driver.len(), 1);

    let note = app
        .state
        .trips
        .add_note(first.id, "Lumper fee approved", Some("dispatcher-2".to_string()))
        .await
        .unwrap();
    assert_eq!(note.event_type, event_types::NOTE_ADDED);
    assert_eq!(note.triggered_by.as_deref(), Some("dispatcher-2"));

    let tail = app.state.events.get_all_events(Some(1)).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, note.id);
}

/// Almacén que tarda en devolver las lecturas de viaje, para abrir la
/// ventana entre validar un estado y escribirlo
struct SlowReadStore {
    inner: Arc<dyn TripStore>,
    delay: std::time::Duration,
}

#[async_trait]
impl TripStore for SlowReadStore {
    async fn insert_trip(&self, trip: NewTrip, event: NewTripEvent) -> AppResult<InsertOutcome> {
        self.inner.insert_trip(trip, event).await
    }

    async fn find_trip(&self, id: Uuid) -> AppResult<Option<Trip>> {
        let trip = self.inner.find_trip(id).await;
        tokio::time::sleep(self.delay).await;
        trip
    }

    async fn find_by_dispatch(&self, dispatch_id: Uuid) -> AppResult<Option<Trip>> {
        self.inner.find_by_dispatch(dispatch_id).await
    }

    async fn list_trips(&self, filters: &TripFilters) -> AppResult<Vec<Trip>> {
        self.inner.list_trips(filters).await
    }

    async fn list_active_trips(&self) -> AppResult<Vec<Trip>> {
        self.inner.list_active_trips().await
    }

    async fn latest_active_for_driver(&self, driver_id: Uuid) -> AppResult<Option<Trip>> {
        self.inner.latest_active_for_driver(driver_id).await
    }

    async fn stops_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripStop>> {
        self.inner.stops_for_trip(trip_id).await
    }

    async fn write_status(
        &self,
        trip_id: Uuid,
        write: StatusWrite,
        event: NewTripEvent,
    ) -> AppResult<(Trip, TripEvent)> {
        self.inner.write_status(trip_id, write, event).await
    }

    async fn update_fields(
        &self,
        trip_id: Uuid,
        patch: &UpdateTripRequest,
        event: NewTripEvent,
    ) -> AppResult<(Trip, TripEvent)> {
        self.inner.update_fields(trip_id, patch, event).await
    }

    async fn apply_location(
        &self,
        trip_id: Uuid,
        update: &LocationUpdate,
        history_cap: usize,
    ) -> AppResult<LocationOutcome> {
        self.inner.apply_location(trip_id, update, history_cap).await
    }

    async fn telemetry_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TelemetryRecord>> {
        self.inner.telemetry_for_trip(trip_id).await
    }
}

#[tokio::test]
async fn test_transition_checked_against_stale_status_does_not_reopen_closed_trip() {
    let stores = Stores::in_memory();
    let (publisher, _messages) = ChannelPublisher::new();
    let bus = EventBus::new(Arc::new(publisher), "tracking");
    let slow: Arc<dyn TripStore> = Arc::new(SlowReadStore {
        inner: stores.trips.clone(),
        delay: std::time::Duration::from_millis(20),
    });
    let trips = TripService::new(slow, EventLog::new(stores.events.clone(), bus.clone()), bus);

    let trip = trips.create(trip_request(None)).await.unwrap();
    assert_eq!(trip.status, TripStatus::Planned);

    let closer = {
        let trips = trips.clone();
        tokio::spawn(async move { trips.close(trip.id, Some("ops-admin".to_string())).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    // Valida planned -> assigned contra una lectura que el cierre deja obsoleta
    let err = trips
        .transition_status(trip.id, TripStatus::Assigned, TransitionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::IllegalTransition {
            from: TripStatus::Closed,
            to: TripStatus::Assigned
        }
    ));
    closer.await.unwrap().unwrap();

    let stored = stores.trips.find_trip(trip.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::Closed);
    assert!(stored.closed_at.is_some());

    // Solo el evento inicial y el de cierre
    let history = trips.history(trip.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.last().unwrap().payload.0["status"], "closed");
}
