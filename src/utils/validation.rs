//! Utilidades de validación
//!
//! Este módulo contiene funciones helper para validaciones que el derive
//! de `validator` no cubre (coordenadas completas, ventanas de tiempo).

use chrono::{DateTime, Utc};
use validator::{ValidationError, ValidationErrors};

use crate::models::LocationInput;
use crate::utils::geo::is_valid_coordinate;

/// Validar que un string no esté vacío
pub fn validate_not_empty(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("not_empty");
        error.add_param("value".into(), &value.to_string());
        return Err(error);
    }
    Ok(())
}

/// Validar formato de coordenadas GPS (finitas y dentro de rango)
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), ValidationError> {
    if !is_valid_coordinate(lat, lng) {
        let mut error = ValidationError::new("coordinates");
        error.add_param("lat".into(), &lat.to_string());
        error.add_param("lng".into(), &lng.to_string());
        error.add_param("range".into(), &"lat -90..90, lng -180..180".to_string());
        return Err(error);
    }
    Ok(())
}

/// Validar que lat/lng vengan juntas o no vengan
pub fn validate_location(location: &LocationInput) -> Result<(), ValidationError> {
    validate_not_empty(&location.address)?;
    match (location.lat, location.lng) {
        (Some(lat), Some(lng)) => validate_coordinates(lat, lng),
        (None, None) => Ok(()),
        _ => {
            let mut error = ValidationError::new("partial_coordinates");
            error.add_param("address".into(), &location.address);
            Err(error)
        }
    }
}

/// Validar que una ventana de tiempo no termine antes de empezar
pub fn validate_time_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            let mut error = ValidationError::new("time_window");
            error.add_param("start".into(), &start.to_rfc3339());
            error.add_param("end".into(), &end.to_rfc3339());
            return Err(error);
        }
    }
    Ok(())
}

/// Agrupa un error suelto bajo el nombre del campo
pub fn field_errors(field: &'static str, error: ValidationError) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    errors
}
