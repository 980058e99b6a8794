//! Modelo de TripException
//!
//! Excepciones operativas por viaje. Pasan de abiertas a resueltas una
//! sola vez; nunca se reabren.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;
use validator::Validate;

/// Tipo de excepción - mapea al ENUM exception_type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "exception_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    LateArrival,
    ExcessiveDwell,
    OffRoute,
    HosViolation,
    BorderDelay,
}

/// Severidad - mapea al ENUM exception_severity (ordenada de menor a mayor)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(type_name = "exception_severity", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TripException {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub exception_type: ExceptionType,
    pub severity: Severity,
    pub message: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Request para levantar una excepción
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RaiseExceptionRequest {
    pub trip_id: Uuid,
    pub exception_type: ExceptionType,
    pub severity: Severity,

    #[validate(length(min = 1, max = 2000))]
    pub message: String,
}

/// Resultado de resolver: `newly_resolved` es false si ya estaba resuelta
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub exception: TripException,
    pub newly_resolved: bool,
}
