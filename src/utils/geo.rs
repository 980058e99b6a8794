//! Utilidades geográficas
//!
//! Distancia y velocidad sobre pares de coordenadas, sin estado.

use chrono::Duration;

/// Radio terrestre medio en millas
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Distancia de gran círculo (haversine) en millas
pub fn haversine_miles(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_MILES * c
}

/// Velocidad media implícita entre dos muestras; `None` si el intervalo no es positivo
pub fn implied_speed_mph(distance_miles: f64, elapsed: Duration) -> Option<f64> {
    let millis = elapsed.num_milliseconds();
    if millis <= 0 {
        return None;
    }
    let hours = millis as f64 / 3_600_000.0;
    Some(distance_miles / hours)
}

/// Coordenadas finitas y dentro de rango
pub fn is_valid_coordinate(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}
