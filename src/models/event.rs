//! Modelo de TripEvent
//!
//! Registro inmutable del historial del viaje (tabla `trip_events`).
//! El `id` es BIGSERIAL: desempata eventos con el mismo `occurred_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Tipos de evento conocidos
pub mod event_types {
    pub const STATUS_CHANGE: &str = "status.change";
    pub const NOTE_ADDED: &str = "note.added";
    pub const LOCATION_UPDATE: &str = "location.update";
    pub const TRIP_UPDATED: &str = "trip.updated";
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TripEvent {
    pub id: i64,
    pub trip_id: Uuid,
    pub event_type: String,
    pub payload: Json<Value>,
    pub triggered_by: Option<String>,
    pub source: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Evento listo para insertar
#[derive(Debug, Clone)]
pub struct NewTripEvent {
    pub trip_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub triggered_by: Option<String>,
    pub source: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Opciones de `EventLog::record`
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    pub payload: Option<Value>,
    pub triggered_by: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
}
