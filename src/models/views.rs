//! Proyecciones de lectura
//!
//! Modelos derivados para tablero de despacho, app del conductor y
//! página de estado del cliente. Nunca se persisten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::exception::TripException;
use super::status::TripStatus;
use super::trip::{Trip, TripStop};

/// Nivel de riesgo calculado por request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Green,
    Yellow,
    Red,
}

/// Fila del tablero de despacho
#[derive(Debug, Clone, Serialize)]
pub struct DispatchBoardEntry {
    pub trip: Trip,
    pub active_exceptions: Vec<TripException>,
    pub risk_level: RiskLevel,
}

/// Vista del conductor: su viaje activo con paradas ordenadas
#[derive(Debug, Clone, Serialize)]
pub struct DriverTripView {
    pub trip: Trip,
    pub stops: Vec<TripStop>,
    pub current_stop_index: usize,
}

/// Estado simplificado para clientes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CustomerStatus {
    #[serde(rename = "Scheduled")]
    Scheduled,
    #[serde(rename = "Picked Up")]
    PickedUp,
    #[serde(rename = "In Transit")]
    InTransit,
    #[serde(rename = "Delivered")]
    Delivered,
}

impl CustomerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CustomerStatus::Scheduled => "Scheduled",
            CustomerStatus::PickedUp => "Picked Up",
            CustomerStatus::InTransit => "In Transit",
            CustomerStatus::Delivered => "Delivered",
        }
    }
}

/// Ventana de tiempo estimada
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EtaWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Vista pública del cliente
#[derive(Debug, Clone, Serialize)]
pub struct CustomerTripView {
    pub trip_id: Uuid,
    pub order_id: Uuid,
    pub status: CustomerStatus,
    pub internal_status: TripStatus,
    pub pickup_eta: EtaWindow,
    pub delivery_eta: EtaWindow,
    pub last_known_location: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}
