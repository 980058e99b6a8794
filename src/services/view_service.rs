//! Proyecciones de lectura
//!
//! Tablero de despacho, vista del conductor y página del cliente. Se
//! calculan en cada llamada a partir del viaje y sus excepciones abiertas.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    CustomerStatus, CustomerTripView, DispatchBoardEntry, DriverTripView, EtaWindow, RiskLevel,
    Severity, Trip, TripException, TripStatus,
};
use crate::repositories::{ExceptionStore, TripStore};
use crate::utils::errors::{not_found_error, AppResult};

/// `red` si está demorado o hay una excepción crítica, `yellow` si hay alguna alta
pub fn risk_level(status: TripStatus, active: &[TripException]) -> RiskLevel {
    let worst = active.iter().map(|e| e.severity).max();

    if status == TripStatus::Delayed || worst == Some(Severity::Critical) {
        RiskLevel::Red
    } else if worst == Some(Severity::High) {
        RiskLevel::Yellow
    } else {
        RiskLevel::Green
    }
}

/// Índice de la parada actual derivado solo del estado
pub fn current_stop_index(status: TripStatus, stop_count: usize) -> usize {
    use TripStatus::*;

    let last = stop_count.saturating_sub(1);
    let index = match status {
        EnRouteToPickup | AtPickup | Loading => 0,
        DepartedPickup | InTransit | EnRouteToDelivery => 1,
        _ => last,
    };
    index.min(last)
}

/// Estado grueso para el cliente; `None` para viajes cancelados
pub fn customer_status(trip: &Trip) -> Option<CustomerStatus> {
    use TripStatus::*;

    let status = match trip.status {
        Planned | Assigned | EnRouteToPickup => CustomerStatus::Scheduled,
        AtPickup | Loading | DepartedPickup => CustomerStatus::PickedUp,
        InTransit | EnRouteToDelivery | AtDelivery | Unloading => CustomerStatus::InTransit,
        Delivered | Completed | Closed => CustomerStatus::Delivered,
        Delayed | CustomsHold => {
            if trip.pickup_departure.is_some() {
                CustomerStatus::InTransit
            } else {
                CustomerStatus::Scheduled
            }
        }
        Cancelled => return None,
    };
    Some(status)
}

pub fn format_coordinates(lat: f64, lng: f64) -> String {
    format!("{:.5}, {:.5}", lat, lng)
}

#[derive(Clone)]
pub struct ViewService {
    trips: Arc<dyn TripStore>,
    exceptions: Arc<dyn ExceptionStore>,
}

impl ViewService {
    pub fn new(trips: Arc<dyn TripStore>, exceptions: Arc<dyn ExceptionStore>) -> Self {
        Self { trips, exceptions }
    }

    /// Todos los viajes activos con sus excepciones abiertas y nivel de riesgo
    pub async fn dispatch_view(&self) -> AppResult<Vec<DispatchBoardEntry>> {
        let trips = self.trips.list_active_trips().await?;
        let ids: Vec<Uuid> = trips.iter().map(|t| t.id).collect();

        let mut by_trip: HashMap<Uuid, Vec<TripException>> = HashMap::new();
        for exception in self.exceptions.active_for_trips(&ids).await? {
            by_trip.entry(exception.trip_id).or_default().push(exception);
        }

        Ok(trips
            .into_iter()
            .map(|trip| {
                let mut active_exceptions = by_trip.remove(&trip.id).unwrap_or_default();
                active_exceptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                let risk_level = risk_level(trip.status, &active_exceptions);
                DispatchBoardEntry {
                    trip,
                    active_exceptions,
                    risk_level,
                }
            })
            .collect())
    }

    /// Viaje activo más reciente del conductor, o `None`
    pub async fn driver_view(&self, driver_id: Uuid) -> AppResult<Option<DriverTripView>> {
        let Some(trip) = self.trips.latest_active_for_driver(driver_id).await? else {
            return Ok(None);
        };

        let stops = self.trips.stops_for_trip(trip.id).await?;
        let current_stop_index = current_stop_index(trip.status, stops.len());
        Ok(Some(DriverTripView {
            trip,
            stops,
            current_stop_index,
        }))
    }

    pub async fn customer_view(&self, trip_id: Uuid) -> AppResult<CustomerTripView> {
        let trip = self
            .trips
            .find_trip(trip_id)
            .await?
            .ok_or_else(|| not_found_error("Trip", &trip_id.to_string()))?;
        let status =
            customer_status(&trip).ok_or_else(|| not_found_error("Trip", &trip_id.to_string()))?;

        Ok(CustomerTripView {
            trip_id: trip.id,
            order_id: trip.order_id,
            status,
            internal_status: trip.status,
            pickup_eta: EtaWindow {
                start: trip.pickup_window_start,
                end: trip.pickup_window_end,
            },
            delivery_eta: EtaWindow {
                start: trip.delivery_window_start,
                end: trip.delivery_window_end,
            },
            last_known_location: trip.last_position().map(|(lat, lng)| format_coordinates(lat, lng)),
            last_update: trip.last_ping_at.or(Some(trip.updated_at)),
            delivered_at: trip.delivery_departure.or(trip.completed_at),
        })
    }
}
