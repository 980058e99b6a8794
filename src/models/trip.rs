//! Modelo de Trip
//!
//! Este módulo contiene el agregado Trip, sus paradas y los requests
//! de creación/actualización. Mapea exactamente a las tablas `trips`
//! y `trip_stops` del schema PostgreSQL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type};
use uuid::Uuid;
use validator::Validate;

use super::location::LocationPoint;
use super::status::TripStatus;

/// Trip principal - raíz del agregado
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub id: Uuid,
    pub order_id: Uuid,
    pub dispatch_id: Option<Uuid>,
    pub driver_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub status: TripStatus,

    pub pickup_address: String,
    pub pickup_lat: Option<f64>,
    pub pickup_lng: Option<f64>,
    pub delivery_address: String,
    pub delivery_lat: Option<f64>,
    pub delivery_lng: Option<f64>,

    pub pickup_window_start: Option<DateTime<Utc>>,
    pub pickup_window_end: Option<DateTime<Utc>>,
    pub delivery_window_start: Option<DateTime<Utc>>,
    pub delivery_window_end: Option<DateTime<Utc>>,

    pub last_lat: Option<f64>,
    pub last_lng: Option<f64>,
    pub last_ping_at: Option<DateTime<Utc>>,

    pub planned_start: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub pickup_arrival: Option<DateTime<Utc>>,
    pub pickup_departure: Option<DateTime<Utc>>,
    pub delivery_arrival: Option<DateTime<Utc>>,
    pub delivery_departure: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,

    pub planned_miles: Option<f64>,
    pub actual_miles: f64,
    pub estimated_fuel: Option<f64>,
    pub route_history: Json<Vec<LocationPoint>>,
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// Última posición conocida, si el viaje ya recibió algún ping
    pub fn last_position(&self) -> Option<(f64, f64)> {
        match (self.last_lat, self.last_lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }
}

/// Tipo de parada - mapea al ENUM stop_type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "stop_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StopType {
    Pickup,
    Intermediate,
    Delivery,
}

/// Parada ordenada de un viaje (secuencia 1-based, sin huecos)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TripStop {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub sequence: i32,
    pub stop_type: StopType,
    pub address: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub departed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Descriptor de ubicación: dirección + coordenadas opcionales
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LocationInput {
    #[validate(length(min = 1, max = 500))]
    pub address: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: Option<f64>,

    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: Option<f64>,
}

impl LocationInput {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            lat: None,
            lng: None,
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lng: f64) -> Self {
        self.lat = Some(lat);
        self.lng = Some(lng);
        self
    }
}

/// Parada intermedia solicitada al crear el viaje
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopInput {
    pub location: LocationInput,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl From<LocationInput> for StopInput {
    fn from(location: LocationInput) -> Self {
        Self {
            location,
            window_start: None,
            window_end: None,
            notes: None,
        }
    }
}

/// Request para crear un nuevo viaje
///
/// `pickup` y `delivery` son opcionales a nivel de tipo porque llegan
/// desde señales externas; su ausencia es un error de validación.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTripRequest {
    pub order_id: Uuid,
    pub dispatch_id: Option<Uuid>,
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

/// Fila de parada lista para insertar (secuencia ya asignada)
#[derive(Debug, Clone)]
pub struct NewTripStop {
    pub sequence: i32,
    pub stop_type: StopType,
    pub location: LocationInput,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Viaje validado listo para persistir junto con sus paradas
#[derive(Debug, Clone)]
pub struct NewTrip {
    pub id: Uuid,
    pub order_id: Uuid,
    pub dispatch_id: Option<Uuid>,
    pub driver_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub pickup: LocationInput,
    pub delivery: LocationInput,
    pub pickup_window_start: Option<DateTime<Utc>>,
    pub pickup_window_end: Option<DateTime<Utc>>,
    pub delivery_window_start: Option<DateTime<Utc>>,
    pub delivery_window_end: Option<DateTime<Utc>>,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_miles: Option<f64>,
    pub notes: Option<String>,
    pub stops: Vec<NewTripStop>,
    pub created_at: DateTime<Utc>,
}

/// Request para actualizar campos de planificación (parcial)
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateTripRequest {
    pub pickup_window_start: Option<DateTime<Utc>>,
    pub pickup_window_end: Option<DateTime<Utc>>,
    pub delivery_window_start: Option<DateTime<Utc>>,
    pub delivery_window_end: Option<DateTime<Utc>>,
    pub planned_start: Option<DateTime<Utc>>,

    #[validate(length(max = 4000))]
    pub notes: Option<String>,

    #[validate(range(min = 0.0))]
    pub planned_miles: Option<f64>,

    #[validate(range(min = 0.0))]
    pub estimated_fuel: Option<f64>,
}

impl UpdateTripRequest {
    /// Nombres de los campos presentes en el patch
    pub fn provided_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.pickup_window_start.is_some() {
            fields.push("pickup_window_start");
        }
        if self.pickup_window_end.is_some() {
            fields.push("pickup_window_end");
        }
        if self.delivery_window_start.is_some() {
            fields.push("delivery_window_start");
        }
        if self.delivery_window_end.is_some() {
            fields.push("delivery_window_end");
        }
        if self.planned_start.is_some() {
            fields.push("planned_start");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        if self.planned_miles.is_some() {
            fields.push("planned_miles");
        }
        if self.estimated_fuel.is_some() {
            fields.push("estimated_fuel");
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.provided_fields().is_empty()
    }
}

/// Filtros para búsqueda de viajes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripFilters {
    pub status: Option<TripStatus>,
    pub driver_id: Option<Uuid>,
    pub dispatch_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
}

impl TripFilters {
    pub fn matches(&self, trip: &Trip) -> bool {
        self.status.map_or(true, |s| trip.status == s)
            && self.driver_id.map_or(true, |d| trip.driver_id == d)
            && self.dispatch_id.map_or(true, |d| trip.dispatch_id == Some(d))
            && self.order_id.map_or(true, |o| trip.order_id == o)
    }
}
