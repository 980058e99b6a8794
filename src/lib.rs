//! Motor de seguimiento y ciclo de vida de viajes
//!
//! Máquina de estados del viaje, ingesta de telemetría, historial de
//! eventos, excepciones operativas y proyecciones de lectura.

pub mod broker;
pub mod config;
pub mod database;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;
pub mod utils;

pub use state::AppState;
pub use utils::errors::{AppError, AppResult};
