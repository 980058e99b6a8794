//! Configuración del proyecto
//!
//! Este módulo contiene la configuración de base de datos, broker,
//! variables de entorno y parámetros del motor de seguimiento.

pub mod database;
pub mod environment;

pub use crate::broker::BrokerConfig;
pub use database::DatabaseConfig;
pub use environment::*;
