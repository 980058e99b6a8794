#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use trip_tracking::broker::{BrokerConfig, ChannelPublisher, MessagePublisher, PublishedMessage};
use trip_tracking::config::TrackingSettings;
use trip_tracking::models::{CreateTripRequest, LocationInput, StopInput, Trip, TripStatus};
use trip_tracking::repositories::Stores;
use trip_tracking::services::TransitionOptions;
use trip_tracking::AppState;

/// Camino feliz completo desde `planned`
pub const FORWARD_PATH: [TripStatus; 11] = [
    TripStatus::Assigned,
    TripStatus::EnRouteToPickup,
    TripStatus::AtPickup,
    TripStatus::Loading,
    TripStatus::DepartedPickup,
    TripStatus::InTransit,
    TripStatus::EnRouteToDelivery,
    TripStatus::AtDelivery,
    TripStatus::Unloading,
    TripStatus::Delivered,
    TripStatus::Completed,
];

pub struct TestApp {
    pub state: AppState,
    pub messages: UnboundedReceiver<PublishedMessage>,
}

pub fn create_test_app() -> TestApp {
    create_test_app_with_settings(TrackingSettings::default())
}

pub fn create_test_app_with_settings(settings: TrackingSettings) -> TestApp {
    let (publisher, messages) = ChannelPublisher::new();
    TestApp {
        state: state_with_publisher(Arc::new(publisher), settings),
        messages,
    }
}

pub fn state_with_publisher(
    publisher: Arc<dyn MessagePublisher>,
    settings: TrackingSettings,
) -> AppState {
    AppState::new(
        Stores::in_memory(),
        publisher,
        &BrokerConfig::default(),
        settings,
    )
}

impl TestApp {
    /// Espera el siguiente mensaje publicado en `topic`, descartando otros
    pub async fn next_message(&mut self, topic: &str) -> PublishedMessage {
        let wait = async {
            loop {
                match self.messages.recv().await {
                    Some(message) if message.topic == topic => return message,
                    Some(_) => continue,
                    None => panic!("publisher channel closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .unwrap_or_else(|_| panic!("no message on {}", topic))
    }

    /// Todo lo publicado hasta ahora
    pub async fn drain(&mut self) -> Vec<PublishedMessage> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut out = Vec::new();
        while let Ok(message) = self.messages.try_recv() {
            out.push(message);
        }
        out
    }

    pub async fn create_trip(&self) -> Trip {
        self.state.trips.create(trip_request(None)).await.unwrap()
    }

    /// Avanza por el camino feliz hasta `target` (inclusive)
    pub async fn advance_to(&self, trip_id: Uuid, target: TripStatus) -> Trip {
        let mut trip = self.state.trips.get(trip_id).await.unwrap();
        for status in FORWARD_PATH {
            if trip.status == target {
                break;
            }
            trip = self
                .state
                .trips
                .transition_status(trip_id, status, TransitionOptions::triggered_by("test"))
                .await
                .unwrap();
        }
        assert_eq!(trip.status, target);
        trip
    }
}

pub fn trip_request(dispatch_id: Option<Uuid>) -> CreateTripRequest {
    CreateTripRequest {
        order_id: Uuid::new_v4(),
        dispatch_id,
        driver_id: Uuid::new_v4(),
        unit_id: Some(Uuid::new_v4()),
        pickup: Some(
            LocationInput::new("4500 W Grand Ave, Chicago IL").with_coordinates(41.9106, -87.7402),
        ),
        delivery: Some(
            LocationInput::new("1 Distribution Way, Memphis TN").with_coordinates(35.1495, -90.0490),
        ),
        planned_miles: Some(532.0),
        ..Default::default()
    }
}

pub fn trip_request_with_stops(stops: &[&str]) -> CreateTripRequest {
    CreateTripRequest {
        intermediate_stops: stops
            .iter()
            .map(|address| StopInput::from(LocationInput::new(*address)))
            .collect(),
        ..trip_request(None)
    }
}
