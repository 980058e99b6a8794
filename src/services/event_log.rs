//! Servicio de Event Log
//!
//! Historial append-only del viaje. Cada fila se persiste primero y
//! después se anuncia en `tracking.event.created` desde una tarea
//! separada; un broker caído nunca falla el registro.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::broker::{topics, EventBus};
use crate::models::event::event_types;
use crate::models::{EventOptions, NewTripEvent, TripEvent, TripStatus};
use crate::repositories::EventStore;
use crate::utils::errors::{validation_error, AppResult};

/// Límite por defecto para `get_all_events`
pub const DEFAULT_TAIL_LIMIT: i64 = 100;

/// Construye la fila a insertar; el payload ausente queda como `{}`
pub fn new_event(trip_id: Uuid, event_type: &str, options: EventOptions) -> NewTripEvent {
    NewTripEvent {
        trip_id,
        event_type: event_type.to_string(),
        payload: options.payload.unwrap_or_else(|| json!({})),
        triggered_by: options.triggered_by,
        source: options.source,
        occurred_at: options.occurred_at.unwrap_or_else(Utc::now),
    }
}

/// Mezcla `{status, reason}` sobre el payload recibido
pub fn status_payload(status: TripStatus, reason: Option<&str>, extra: Option<Value>) -> Value {
    let mut map = match extra {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
        None => Map::new(),
    };
    map.insert("status".to_string(), json!(status));
    map.insert("reason".to_string(), json!(reason));
    Value::Object(map)
}

#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn EventStore>,
    bus: EventBus,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Inserta un evento y lo publica
    pub async fn record(
        &self,
        trip_id: Uuid,
        event_type: &str,
        options: EventOptions,
    ) -> AppResult<TripEvent> {
        if event_type.trim().is_empty() {
            return Err(validation_error("event_type", "Event type is required"));
        }

        let event = self
            .store
            .insert_event(new_event(trip_id, event_type, options))
            .await?;
        debug!("📝 Evento {} registrado para viaje {}", event.event_type, trip_id);

        self.announce(&event);
        Ok(event)
    }

    pub async fn record_status_event(
        &self,
        trip_id: Uuid,
        status: TripStatus,
        reason: Option<&str>,
        mut options: EventOptions,
    ) -> AppResult<TripEvent> {
        options.payload = Some(status_payload(status, reason, options.payload.take()));
        self.record(trip_id, event_types::STATUS_CHANGE, options).await
    }

    /// Nota libre de conductor o despachador
    pub async fn record_note(
        &self,
        trip_id: Uuid,
        note: &str,
        author: Option<String>,
    ) -> AppResult<TripEvent> {
        if note.trim().is_empty() {
            return Err(validation_error("note", "Note text is required"));
        }

        let options = EventOptions {
            payload: Some(json!({ "note": note })),
            triggered_by: author,
            ..Default::default()
        };
        self.record(trip_id, event_types::NOTE_ADDED, options).await
    }

    pub async fn get_trip_events(&self, trip_id: Uuid) -> AppResult<Vec<TripEvent>> {
        self.store.events_for_trip(trip_id).await
    }

    /// Los `limit` eventos más recientes de todos los viajes
    pub async fn get_all_events(&self, limit: Option<i64>) -> AppResult<Vec<TripEvent>> {
        let limit = limit.unwrap_or(DEFAULT_TAIL_LIMIT).max(0);
        self.store.recent_events(limit).await
    }

    /// Publica `event.created` para una fila ya confirmada
    pub fn announce(&self, event: &TripEvent) -> JoinHandle<()> {
        self.bus.emit(
            topics::EVENT_CREATED,
            json!({
                "event_id": event.id,
                "trip_id": event.trip_id,
                "event_type": event.event_type,
                "payload": event.payload.0,
                "triggered_by": event.triggered_by,
                "source": event.source,
                "occurred_at": event.occurred_at.to_rfc3339(),
            }),
        )
    }
}
