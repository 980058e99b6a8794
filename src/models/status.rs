//! Estados del viaje
//!
//! Mapea al ENUM `trip_status` de PostgreSQL. Las reglas de transición
//! viven en `services::status_machine`, no aquí.

use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use std::str::FromStr;

/// Estado del viaje - mapea al ENUM trip_status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "trip_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Planned,
    Assigned,
    EnRouteToPickup,
    AtPickup,
    Loading,
    DepartedPickup,
    InTransit,
    EnRouteToDelivery,
    AtDelivery,
    Unloading,
    Delivered,
    Completed,
    Closed,
    Delayed,
    Cancelled,
    /// Solo lo usa el flujo de aduanas; no es alcanzable desde la tabla.
    CustomsHold,
}

impl TripStatus {
    pub const ALL: [TripStatus; 16] = [
        TripStatus::Planned,
        TripStatus::Assigned,
        TripStatus::EnRouteToPickup,
        TripStatus::AtPickup,
        TripStatus::Loading,
        TripStatus::DepartedPickup,
        TripStatus::InTransit,
        TripStatus::EnRouteToDelivery,
        TripStatus::AtDelivery,
        TripStatus::Unloading,
        TripStatus::Delivered,
        TripStatus::Completed,
        TripStatus::Closed,
        TripStatus::Delayed,
        TripStatus::Cancelled,
        TripStatus::CustomsHold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Planned => "planned",
            TripStatus::Assigned => "assigned",
            TripStatus::EnRouteToPickup => "en_route_to_pickup",
            TripStatus::AtPickup => "at_pickup",
            TripStatus::Loading => "loading",
            TripStatus::DepartedPickup => "departed_pickup",
            TripStatus::InTransit => "in_transit",
            TripStatus::EnRouteToDelivery => "en_route_to_delivery",
            TripStatus::AtDelivery => "at_delivery",
            TripStatus::Unloading => "unloading",
            TripStatus::Delivered => "delivered",
            TripStatus::Completed => "completed",
            TripStatus::Closed => "closed",
            TripStatus::Delayed => "delayed",
            TripStatus::Cancelled => "cancelled",
            TripStatus::CustomsHold => "customs_hold",
        }
    }

    /// `closed` y `cancelled` son los únicos estados finales
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Closed | TripStatus::Cancelled)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TripStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown trip status '{}'", value))
    }
}
