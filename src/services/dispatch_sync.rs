//! Sincronización con el servicio de despacho
//!
//! Traduce las señales entrantes "dispatch assigned" y "dispatch status
//! changed" a operaciones del agregado Trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::trip_service::{TransitionOptions, TripService};
use crate::broker::{BrokerConfig, InboundMessage};
use crate::models::{CreateTripRequest, LocationInput, StopInput, Trip, TripStatus};
use crate::utils::errors::AppResult;

const DISPATCH_ACTOR: &str = "dispatch";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAssigned {
    pub dispatch_id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub pickup: Option<LocationInput>,
    pub delivery: Option<LocationInput>,
    #[serde(default)]
    pub intermediate_stops: Vec<StopInput>,
    pub pickup_window_start: Option<DateTime<Utc>>,
    pub pickup_window_end: Option<DateTime<Utc>>,
    pub delivery_window_start: Option<DateTime<Utc>>,
    pub delivery_window_end: Option<DateTime<Utc>>,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_miles: Option<f64>,
    pub notes: Option<String>,
}

impl From<DispatchAssigned> for CreateTripRequest {
    fn from(signal: DispatchAssigned) -> Self {
        Self {
            order_id: signal.order_id,
            dispatch_id: Some(signal.dispatch_id),
            driver_id: signal.driver_id,
            unit_id: signal.unit_id,
            pickup: signal.pickup,
            delivery: signal.delivery,
            intermediate_stops: signal.intermediate_stops,
            pickup_window_start: signal.pickup_window_start,
            pickup_window_end: signal.pickup_window_end,
            delivery_window_start: signal.delivery_window_start,
            delivery_window_end: signal.delivery_window_end,
            planned_start: signal.planned_start,
            planned_miles: signal.planned_miles,
            notes: signal.notes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchStatusChanged {
    pub dispatch_id: Uuid,
    pub status: String,
    pub reason: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Tabla fija de estados del despacho; el resto se ignora
pub fn map_dispatch_status(status: &str) -> Option<TripStatus> {
    match status {
        "ASSIGNED" => Some(TripStatus::Assigned),
        "IN_PROGRESS" => Some(TripStatus::InTransit),
        "COMPLETED" => Some(TripStatus::Completed),
        "CANCELLED" => Some(TripStatus::Cancelled),
        _ => None,
    }
}

/// Decide si un mensaje entrante se confirma con XACK. Se confirma si se
/// procesó o si el rechazo es de negocio (reintentarlo daría lo mismo); los
/// fallos de infraestructura quedan pendientes y se releen al reiniciar.
pub fn should_ack<T>(result: &AppResult<T>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => e.status_code().is_client_error(),
    }
}

#[derive(Clone)]
pub struct DispatchSync {
    trips: TripService,
    assigned_stream: String,
    status_stream: String,
}

impl DispatchSync {
    pub fn new(trips: TripService, config: &BrokerConfig) -> Self {
        Self {
            trips,
            assigned_stream: config.dispatch_assigned_stream.clone(),
            status_stream: config.dispatch_status_stream.clone(),
        }
    }

    /// Creación idempotente: una segunda señal devuelve el mismo viaje
    pub async fn handle_dispatch_assigned(&self, signal: DispatchAssigned) -> AppResult<Trip> {
        info!("📥 Dispatch {} asignado al conductor {}", signal.dispatch_id, signal.driver_id);
        self.trips.create(signal.into()).await
    }

    /// `Ok(None)` si el estado no está mapeado o el dispatch no tiene viaje
    pub async fn handle_dispatch_status_changed(
        &self,
        signal: DispatchStatusChanged,
    ) -> AppResult<Option<Trip>> {
        let Some(next) = map_dispatch_status(&signal.status) else {
            debug!("Estado de dispatch '{}' sin mapeo, se ignora", signal.status);
            return Ok(None);
        };

        let Some(trip) = self.trips.get_by_dispatch_id(signal.dispatch_id).await? else {
            debug!("Dispatch {} sin viaje asociado, se ignora", signal.dispatch_id);
            return Ok(None);
        };

        let options = TransitionOptions {
            triggered_by: Some(DISPATCH_ACTOR.to_string()),
            reason: signal.reason.or(Some(format!("dispatch {}", signal.status))),
            occurred_at: signal.occurred_at,
        };
        self.trips
            .transition_status(trip.id, next, options)
            .await
            .map(Some)
    }

    /// Despacha un mensaje de los streams de entrada. Los payloads
    /// malformados se registran y se descartan.
    pub async fn handle_inbound(&self, message: InboundMessage) -> AppResult<()> {
        let InboundMessage {
            stream,
            id,
            payload,
        } = message;

        if stream == self.assigned_stream {
            let Some(signal) = parse::<DispatchAssigned>(&stream, &id, payload) else {
                return Ok(());
            };
            self.handle_dispatch_assigned(signal).await?;
        } else if stream == self.status_stream {
            let Some(signal) = parse::<DispatchStatusChanged>(&stream, &id, payload) else {
                return Ok(());
            };
            self.handle_dispatch_status_changed(signal).await?;
        } else {
            debug!("Stream {} no reconocido, mensaje {} ignorado", stream, id);
        }

        Ok(())
    }
}

fn parse<T: serde::de::DeserializeOwned>(stream: &str, id: &str, payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!("⚠️ Mensaje {} en {} con formato inválido: {}", id, stream, e);
            None
        }
    }
}
