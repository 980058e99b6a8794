//! Punto de contacto con el flujo de aduanas
//!
//! Al aprobarse el despacho aduanero el viaje pasa a `in_transit`. Si la
//! máquina de estados rechaza el salto, se degrada a una escritura
//! directa para no bloquear la liberación.

use tracing::warn;
use uuid::Uuid;

use super::trip_service::{TransitionOptions, TripService};
use crate::models::{Trip, TripStatus};
use crate::utils::errors::AppResult;

pub const CUSTOMS_ACTOR: &str = "customs";
pub const CUSTOMS_OVERRIDE_REASON: &str = "customs_override";

#[derive(Clone)]
pub struct CustomsBridge {
    trips: TripService,
}

impl CustomsBridge {
    pub fn new(trips: TripService) -> Self {
        Self { trips }
    }

    pub async fn on_clearance_approved(&self, trip_id: Uuid) -> AppResult<Trip> {
        let result = self
            .trips
            .transition_status(
                trip_id,
                TripStatus::InTransit,
                TransitionOptions::triggered_by(CUSTOMS_ACTOR),
            )
            .await;

        match result {
            Err(e) if e.is_illegal_transition() => {
                warn!("🛃 Aduana liberó viaje {} pero {}; se fuerza in_transit", trip_id, e);
                self.trips
                    .force_status(
                        trip_id,
                        TripStatus::InTransit,
                        TransitionOptions::triggered_by(CUSTOMS_ACTOR)
                            .with_reason(CUSTOMS_OVERRIDE_REASON),
                    )
                    .await
            }
            other => other,
        }
    }
}
