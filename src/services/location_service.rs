//! Servicio de seguimiento de ubicación
//!
//! Ingesta de pings de telemetría. El read-modify-write de la última
//! posición corre en el repositorio bajo lock exclusivo de la fila del
//! viaje; este servicio valida, registra el evento y nunca toca `status`.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;
use validator::Validate;

use super::event_log::EventLog;
use crate::config::TrackingSettings;
use crate::models::event::event_types;
use crate::models::{EventOptions, LocationUpdate, TelemetryRecord};
use crate::repositories::{LocationOutcome, TripStore};
use crate::utils::errors::{validation_error, AppResult};
use crate::utils::geo::is_valid_coordinate;

#[derive(Clone)]
pub struct LocationService {
    trips: Arc<dyn TripStore>,
    events: EventLog,
    settings: TrackingSettings,
}

impl LocationService {
    pub fn new(trips: Arc<dyn TripStore>, events: EventLog, settings: TrackingSettings) -> Self {
        Self {
            trips,
            events,
            settings,
        }
    }

    /// Aplica un ping. Todo-o-nada: telemetría cruda + posición + millas
    /// + historial se confirman juntos.
    pub async fn apply_location_update(
        &self,
        trip_id: Uuid,
        update: LocationUpdate,
    ) -> AppResult<LocationOutcome> {
        update.validate()?;
        if !is_valid_coordinate(update.lat, update.lng) {
            return Err(validation_error("lat", "Coordinates must be finite"));
        }

        let outcome = self
            .trips
            .apply_location(trip_id, &update, self.settings.route_history_cap)
            .await?;
        let advance = &outcome.advance;

        if advance.out_of_order() {
            warn!(
                "⏪ Ping fuera de orden para viaje {} ({} < {:?}), solo auditoría",
                trip_id, advance.point.timestamp, outcome.trip.last_ping_at
            );
        } else {
            debug!(
                "📍 Viaje {}: +{:.3} mi (total {:.3})",
                trip_id, advance.distance_miles, outcome.trip.actual_miles
            );
        }

        let options = EventOptions {
            payload: Some(json!({
                "telemetry_id": outcome.telemetry_id,
                "lat": update.lat,
                "lng": update.lng,
                "speed": update.speed,
                "heading": update.heading,
                "distance_miles": advance.distance_miles,
                "actual_miles": outcome.trip.actual_miles,
                "implied_speed_mph": advance.implied_speed_mph,
                "out_of_order": advance.out_of_order(),
            })),
            triggered_by: update.driver_id.map(|id| id.to_string()),
            occurred_at: Some(advance.point.timestamp),
            source: Some(update.source.clone()),
        };

        // El ping ya está confirmado: un fallo aquí no se propaga
        if let Err(e) = self
            .events
            .record(trip_id, event_types::LOCATION_UPDATE, options)
            .await
        {
            error!("❌ No se pudo registrar location.update para viaje {}: {}", trip_id, e);
        }

        Ok(outcome)
    }

    /// Telemetría cruda del viaje, incluida la marcada fuera de orden
    pub async fn telemetry(&self, trip_id: Uuid) -> AppResult<Vec<TelemetryRecord>> {
        self.trips.telemetry_for_trip(trip_id).await
    }
}
