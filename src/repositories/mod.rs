//! Repositorios
//!
//! Contratos de almacenamiento del motor de seguimiento. Hay una
//! implementación PostgreSQL (producción) y una en memoria (tests y
//! ejecución local con `TRACKING_STORAGE=memory`).

pub mod event_repository;
pub mod exception_repository;
pub mod memory;
pub mod trip_repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    LocationUpdate, NewTrip, NewTripEvent, ResolveOutcome, TelemetryRecord, TrackAdvance, Trip,
    TripEvent, TripException, TripFilters, TripStatus, TripStop, UpdateTripRequest,
};
use crate::services::status_machine::Milestone;
use crate::utils::errors::AppResult;

pub use event_repository::PgEventRepository;
pub use exception_repository::PgExceptionRepository;
pub use memory::InMemoryStore;
pub use trip_repository::PgTripRepository;

/// Escritura de estado ya validada por el servicio
#[derive(Debug, Clone, Copy)]
pub struct StatusWrite {
    /// Estado leído al validar; `None` escribe sin comparar (overrides)
    pub expected: Option<TripStatus>,
    pub status: TripStatus,
    pub milestone: Option<Milestone>,
    pub at: DateTime<Utc>,
}

/// Resultado de aplicar un ping bajo lock
#[derive(Debug, Clone)]
pub struct LocationOutcome {
    pub trip: Trip,
    pub advance: TrackAdvance,
    pub telemetry_id: Uuid,
}

/// Resultado de insertar un viaje: `created` es false si ya existía para el dispatch
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub trip: Trip,
    pub created: bool,
    /// Evento inicial, solo si el viaje se creó en esta llamada
    pub event: Option<TripEvent>,
}

#[async_trait]
pub trait TripStore: Send + Sync {
    /// Inserta viaje + paradas + evento inicial de forma atómica.
    /// Idempotente por `dispatch_id`.
    async fn insert_trip(&self, trip: NewTrip, event: NewTripEvent) -> AppResult<InsertOutcome>;

    async fn find_trip(&self, id: Uuid) -> AppResult<Option<Trip>>;

    /// Viaje más reciente para un dispatch
    async fn find_by_dispatch(&self, dispatch_id: Uuid) -> AppResult<Option<Trip>>;

    async fn list_trips(&self, filters: &TripFilters) -> AppResult<Vec<Trip>>;

    /// Todos los viajes que no están en `closed`/`cancelled`
    async fn list_active_trips(&self) -> AppResult<Vec<Trip>>;

    async fn latest_active_for_driver(&self, driver_id: Uuid) -> AppResult<Option<Trip>>;

    async fn stops_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripStop>>;

    /// Cambia el estado, estampa hito + parada y agrega el evento
    /// en una sola transacción. Si `expected` no coincide con el estado
    /// actual no escribe nada y devuelve `IllegalTransition`.
    async fn write_status(
        &self,
        trip_id: Uuid,
        write: StatusWrite,
        event: NewTripEvent,
    ) -> AppResult<(Trip, TripEvent)>;

    async fn update_fields(
        &self,
        trip_id: Uuid,
        patch: &UpdateTripRequest,
        event: NewTripEvent,
    ) -> AppResult<(Trip, TripEvent)>;

    /// Lee-modifica-escribe bajo lock exclusivo de la fila del viaje
    async fn apply_location(
        &self,
        trip_id: Uuid,
        update: &LocationUpdate,
        history_cap: usize,
    ) -> AppResult<LocationOutcome>;

    async fn telemetry_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TelemetryRecord>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: NewTripEvent) -> AppResult<TripEvent>;

    /// Historial completo, por `occurred_at` y luego orden de inserción
    async fn events_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripEvent>>;

    /// Los N eventos más recientes de todos los viajes
    async fn recent_events(&self, limit: i64) -> AppResult<Vec<TripEvent>>;
}

#[async_trait]
pub trait ExceptionStore: Send + Sync {
    async fn insert_exception(&self, exception: TripException) -> AppResult<TripException>;

    async fn find_exception(&self, id: Uuid) -> AppResult<Option<TripException>>;

    /// `None` si el id no existe
    async fn resolve_exception(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<ResolveOutcome>>;

    /// Abiertas de un viaje, más recientes primero
    async fn active_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripException>>;

    async fn active_for_trips(&self, trip_ids: &[Uuid]) -> AppResult<Vec<TripException>>;
}

/// Conjunto de almacenes que comparten los servicios
#[derive(Clone)]
pub struct Stores {
    pub trips: Arc<dyn TripStore>,
    pub events: Arc<dyn EventStore>,
    pub exceptions: Arc<dyn ExceptionStore>,
}

impl Stores {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            trips: Arc::new(PgTripRepository::new(pool.clone())),
            events: Arc::new(PgEventRepository::new(pool.clone())),
            exceptions: Arc::new(PgExceptionRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(InMemoryStore::new()))
    }

    pub fn from_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            trips: store.clone(),
            events: store.clone(),
            exceptions: store,
        }
    }
}
