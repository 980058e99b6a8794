//! Services module
//!
//! Este módulo contiene la lógica de negocio del motor de seguimiento.
//! Los servicios componen la máquina de estados, los repositorios y el
//! bus de mensajes.

pub mod customs_bridge;
pub mod dispatch_sync;
pub mod event_log;
pub mod exception_service;
pub mod location_service;
pub mod status_machine;
pub mod trip_service;
pub mod view_service;

pub use customs_bridge::CustomsBridge;
pub use dispatch_sync::{should_ack, DispatchAssigned, DispatchStatusChanged, DispatchSync};
pub use event_log::EventLog;
pub use exception_service::ExceptionService;
pub use location_service::LocationService;
pub use trip_service::{TransitionOptions, TripService};
pub use view_service::ViewService;
