//! Modelos del sistema
//!
//! Este módulo contiene todos los modelos de datos que mapean exactamente
//! al schema PostgreSQL de seguimiento de viajes.

pub mod event;
pub mod exception;
pub mod location;
pub mod status;
pub mod trip;
pub mod views;

pub use event::{EventOptions, NewTripEvent, TripEvent};
pub use exception::{ExceptionType, RaiseExceptionRequest, ResolveOutcome, Severity, TripException};
pub use location::{LocationPoint, LocationUpdate, TelemetryRecord, TrackAdvance, TrackingSnapshot};
pub use status::TripStatus;
pub use trip::{
    CreateTripRequest, LocationInput, NewTrip, NewTripStop, StopInput, StopType, Trip, TripFilters,
    TripStop, UpdateTripRequest,
};
pub use views::{
    CustomerStatus, CustomerTripView, DispatchBoardEntry, DriverTripView, EtaWindow, RiskLevel,
};
