//! Servicio de excepciones
//!
//! Ledger de riesgos operativos por viaje. Resolver es siempre una
//! acción explícita y ocurre una sola vez.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::broker::{topics, EventBus};
use crate::models::{RaiseExceptionRequest, TripException};
use crate::repositories::{ExceptionStore, TripStore};
use crate::utils::errors::{not_found_error, AppResult};

#[derive(Clone)]
pub struct ExceptionService {
    trips: Arc<dyn TripStore>,
    exceptions: Arc<dyn ExceptionStore>,
    bus: EventBus,
}

impl ExceptionService {
    pub fn new(
        trips: Arc<dyn TripStore>,
        exceptions: Arc<dyn ExceptionStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            trips,
            exceptions,
            bus,
        }
    }

    pub async fn raise(&self, request: RaiseExceptionRequest) -> AppResult<TripException> {
        request.validate()?;
        if self.trips.find_trip(request.trip_id).await?.is_none() {
            return Err(not_found_error("Trip", &request.trip_id.to_string()));
        }

        let exception = self
            .exceptions
            .insert_exception(TripException {
                id: Uuid::new_v4(),
                trip_id: request.trip_id,
                exception_type: request.exception_type,
                severity: request.severity,
                message: request.message,
                resolved: false,
                resolved_at: None,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            "🚨 Excepción {:?} ({:?}) abierta en viaje {}",
            exception.exception_type, exception.severity, exception.trip_id
        );
        self.bus.emit(
            topics::EXCEPTION_RAISED,
            json!({
                "exception_id": exception.id,
                "trip_id": exception.trip_id,
                "exception_type": exception.exception_type,
                "severity": exception.severity,
                "message": exception.message,
            }),
        );

        Ok(exception)
    }

    /// Marca como resuelta. Sobre una ya resuelta devuelve el registro tal cual.
    pub async fn resolve(&self, exception_id: Uuid) -> AppResult<TripException> {
        let outcome = self
            .exceptions
            .resolve_exception(exception_id, Utc::now())
            .await?
            .ok_or_else(|| not_found_error("Exception", &exception_id.to_string()))?;

        if !outcome.newly_resolved {
            debug!("Excepción {} ya estaba resuelta", exception_id);
            return Ok(outcome.exception);
        }

        let exception = outcome.exception;
        info!("✅ Excepción {} resuelta (viaje {})", exception.id, exception.trip_id);
        self.bus.emit(
            topics::EXCEPTION_RESOLVED,
            json!({
                "exception_id": exception.id,
                "trip_id": exception.trip_id,
                "exception_type": exception.exception_type,
                "resolved_at": exception.resolved_at.map(|t| t.to_rfc3339()),
            }),
        );

        Ok(exception)
    }

    /// Abiertas, más recientes primero
    pub async fn get_active(&self, trip_id: Uuid) -> AppResult<Vec<TripException>> {
        self.exceptions.active_for_trip(trip_id).await
    }
}
