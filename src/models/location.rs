//! Telemetría de ubicación
//!
//! Puntos del historial de ruta, pings entrantes y el cálculo puro de
//! avance que los repositorios ejecutan mientras tienen el lock de fila.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::utils::geo::{haversine_miles, implied_speed_mph};

/// Capacidad por defecto del historial de ruta
pub const DEFAULT_ROUTE_HISTORY_CAP: usize = 2000;

/// Punto del historial de ruta (value object)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub source: String,
}

/// Ping de telemetría entrante
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LocationUpdate {
    pub driver_id: Option<Uuid>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,

    #[validate(range(min = 0.0))]
    pub speed: Option<f64>,

    #[validate(range(min = 0.0, max = 360.0))]
    pub heading: Option<f64>,

    pub odometer: Option<f64>,
    pub fuel_level: Option<f64>,

    #[validate(length(min = 1, max = 64))]
    pub source: String,

    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationUpdate {
    pub fn new(lat: f64, lng: f64, source: impl Into<String>) -> Self {
        Self {
            driver_id: None,
            lat,
            lng,
            speed: None,
            heading: None,
            odometer: None,
            fuel_level: None,
            source: source.into(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Registro crudo de telemetría (tabla trip_locations) para auditoría/replay
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub odometer: Option<f64>,
    pub fuel_level: Option<f64>,
    pub source: String,
    pub recorded_at: DateTime<Utc>,
    pub out_of_order: bool,
}

/// Estado de seguimiento leído bajo lock
#[derive(Debug, Clone, Default)]
pub struct TrackingSnapshot {
    pub last_lat: Option<f64>,
    pub last_lng: Option<f64>,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub actual_miles: f64,
    pub route_history: Vec<LocationPoint>,
}

/// Resultado de aplicar un ping sobre un snapshot
#[derive(Debug, Clone)]
pub struct TrackAdvance {
    /// false si el ping llegó con timestamp anterior al último aplicado
    pub applied: bool,
    pub distance_miles: f64,
    pub implied_speed_mph: Option<f64>,
    pub point: LocationPoint,
    pub snapshot: TrackingSnapshot,
}

impl TrackAdvance {
    pub fn out_of_order(&self) -> bool {
        !self.applied
    }
}

impl TrackingSnapshot {
    /// Aplica un ping: suma distancia haversine, agrega al historial y
    /// recorta por el frente. Los pings rezagados no mueven nada.
    pub fn advance(
        mut self,
        update: &LocationUpdate,
        received_at: DateTime<Utc>,
        history_cap: usize,
    ) -> TrackAdvance {
        let timestamp = update.timestamp.unwrap_or(received_at);
        let point = LocationPoint {
            lat: update.lat,
            lng: update.lng,
            timestamp,
            speed: update.speed,
            heading: update.heading,
            source: update.source.clone(),
        };

        if matches!(self.last_ping_at, Some(last) if timestamp < last) {
            return TrackAdvance {
                applied: false,
                distance_miles: 0.0,
                implied_speed_mph: None,
                point,
                snapshot: self,
            };
        }

        let (distance_miles, implied_speed) = match (self.last_lat, self.last_lng) {
            (Some(lat), Some(lng)) => {
                let distance = haversine_miles(lat, lng, update.lat, update.lng);
                let speed = self
                    .last_ping_at
                    .and_then(|last| implied_speed_mph(distance, timestamp - last));
                (distance, speed)
            }
            _ => (0.0, None),
        };

        self.actual_miles += distance_miles;
        self.last_lat = Some(update.lat);
        self.last_lng = Some(update.lng);
        self.last_ping_at = Some(timestamp);
        push_capped(&mut self.route_history, point.clone(), history_cap);

        TrackAdvance {
            applied: true,
            distance_miles,
            implied_speed_mph: implied_speed,
            point,
            snapshot: self,
        }
    }
}

/// Agrega un punto y descarta los más antiguos (FIFO) por encima de `cap`
pub fn push_capped(history: &mut Vec<LocationPoint>, point: LocationPoint, cap: usize) {
    history.push(point);
    if history.len() > cap {
        let overflow = history.len() - cap;
        history.drain(..overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn point(n: usize) -> LocationPoint {
        LocationPoint {
            lat: 40.0,
            lng: -100.0 + n as f64 * 0.001,
            timestamp: Utc::now(),
            speed: None,
            heading: None,
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_push_capped_evicts_oldest_first() {
        let mut history = Vec::new();
        for n in 0..10 {
            push_capped(&mut history, point(n), 4);
        }
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].lng, point(6).lng);
        assert_eq!(history[3].lng, point(9).lng);
    }

    #[test]
    fn test_first_ping_adds_zero_distance() {
        let now = Utc::now();
        let advance = TrackingSnapshot::default().advance(
            &LocationUpdate::new(39.5296, -119.8138, "eld"),
            now,
            DEFAULT_ROUTE_HISTORY_CAP,
        );
        assert!(advance.applied);
        assert_eq!(advance.distance_miles, 0.0);
        assert_eq!(advance.snapshot.actual_miles, 0.0);
        assert_eq!(advance.snapshot.route_history.len(), 1);
        assert_eq!(advance.snapshot.last_ping_at, Some(now));
    }

    #[test]
    fn test_second_ping_accumulates_distance_and_speed() {
        let start = Utc::now();
        let first = TrackingSnapshot::default().advance(
            &LocationUpdate::new(40.0, -100.0, "eld").at(start),
            start,
            DEFAULT_ROUTE_HISTORY_CAP,
        );
        // ~1 milla hacia el norte
        let second = first.snapshot.advance(
            &LocationUpdate::new(40.014_473, -100.0, "eld").at(start + Duration::minutes(1)),
            start,
            DEFAULT_ROUTE_HISTORY_CAP,
        );
        assert!((second.distance_miles - 1.0).abs() < 0.01);
        assert!((second.snapshot.actual_miles - 1.0).abs() < 0.01);
        let speed = second.implied_speed_mph.unwrap();
        assert!((speed - 60.0).abs() < 1.0);
    }

    #[test]
    fn test_straggler_ping_is_not_applied() {
        let start = Utc::now();
        let first = TrackingSnapshot::default().advance(
            &LocationUpdate::new(40.0, -100.0, "eld").at(start),
            start,
            DEFAULT_ROUTE_HISTORY_CAP,
        );
        let late = first.snapshot.clone().advance(
            &LocationUpdate::new(41.0, -100.0, "phone").at(start - Duration::seconds(30)),
            start,
            DEFAULT_ROUTE_HISTORY_CAP,
        );
        assert!(late.out_of_order());
        assert_eq!(late.snapshot.last_lat, Some(40.0));
        assert_eq!(late.snapshot.route_history.len(), 1);
        assert_eq!(late.snapshot.actual_miles, 0.0);
    }

    #[test]
    fn test_equal_timestamp_is_in_order() {
        let start = Utc::now();
        let first = TrackingSnapshot::default().advance(
            &LocationUpdate::new(40.0, -100.0, "eld").at(start),
            start,
            DEFAULT_ROUTE_HISTORY_CAP,
        );
        let same = first.snapshot.advance(
            &LocationUpdate::new(40.01, -100.0, "phone").at(start),
            start,
            DEFAULT_ROUTE_HISTORY_CAP,
        );
        assert!(same.applied);
        assert!(same.implied_speed_mph.is_none());
        assert_eq!(same.snapshot.route_history.len(), 2);
    }
}
