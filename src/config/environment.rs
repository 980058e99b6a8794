//! Configuración de variables de entorno
//!
//! Este módulo lee el entorno una sola vez al arrancar y produce valores
//! explícitos que se pasan a cada servicio. No hay estado global.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::database::DatabaseConfig;
use crate::broker::BrokerConfig;
use crate::models::location::DEFAULT_ROUTE_HISTORY_CAP;

/// Backend de almacenamiento
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Postgres => "postgres",
            StorageBackend::Memory => "memory",
        }
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow!("unknown TRACKING_STORAGE '{}'", other)),
        }
    }
}

/// Parámetros del motor que los servicios reciben al construirse
#[derive(Debug, Clone)]
pub struct TrackingSettings {
    /// Máximo de puntos en `route_history` (FIFO)
    pub route_history_cap: usize,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            route_history_cap: DEFAULT_ROUTE_HISTORY_CAP,
        }
    }
}

/// Configuración del entorno
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub environment: String,
    pub port: u16,
    pub host: String,
    pub log_level: String,
    pub storage: StorageBackend,
    /// Solo presente con `TRACKING_STORAGE=postgres`
    pub database: Option<DatabaseConfig>,
    pub broker: BrokerConfig,
    pub tracking: TrackingSettings,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} must be a valid value: {}", key, e)),
        None => Ok(default),
    }
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

impl EnvironmentConfig {
    /// Lee la configuración del proceso (después de `dotenvy`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let storage = parse_or(&lookup, "TRACKING_STORAGE", StorageBackend::Postgres)?;

        let database = match storage {
            StorageBackend::Postgres => {
                let url = lookup("DATABASE_URL")
                    .context("DATABASE_URL must be set when TRACKING_STORAGE=postgres")?;
                let mut config = DatabaseConfig::new(url);
                config.max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 20)?;
                config.min_connections = parse_or(&lookup, "DATABASE_MIN_CONNECTIONS", 2)?;
                config.connect_timeout =
                    Duration::from_secs(parse_or(&lookup, "DATABASE_CONNECT_TIMEOUT_SECS", 30)?);
                Some(config)
            }
            StorageBackend::Memory => None,
        };

        let defaults = BrokerConfig::default();
        let broker = BrokerConfig {
            redis_url: string_or(&lookup, "REDIS_URL", &defaults.redis_url),
            topic_prefix: string_or(&lookup, "BROKER_TOPIC_PREFIX", &defaults.topic_prefix),
            stream_max_len: parse_or(&lookup, "BROKER_STREAM_MAXLEN", defaults.stream_max_len)?,
            dispatch_assigned_stream: string_or(
                &lookup,
                "INBOUND_DISPATCH_ASSIGNED_STREAM",
                &defaults.dispatch_assigned_stream,
            ),
            dispatch_status_stream: string_or(
                &lookup,
                "INBOUND_DISPATCH_STATUS_STREAM",
                &defaults.dispatch_status_stream,
            ),
            consumer_group: string_or(&lookup, "BROKER_CONSUMER_GROUP", &defaults.consumer_group),
            consumer_name: string_or(&lookup, "BROKER_CONSUMER_NAME", &defaults.consumer_name),
            read_block_ms: defaults.read_block_ms,
        };

        let route_history_cap = parse_or(&lookup, "ROUTE_HISTORY_CAP", DEFAULT_ROUTE_HISTORY_CAP)?;
        if route_history_cap == 0 {
            return Err(anyhow!("ROUTE_HISTORY_CAP must be greater than zero"));
        }

        Ok(Self {
            environment: string_or(&lookup, "ENVIRONMENT", "development"),
            port: parse_or(&lookup, "PORT", 3000)?,
            host: string_or(&lookup, "HOST", "0.0.0.0"),
            log_level: string_or(&lookup, "LOG_LEVEL", "info"),
            storage,
            database,
            broker,
            tracking: TrackingSettings { route_history_cap },
        })
    }

    /// Verificar si estamos en modo desarrollo
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Verificar si estamos en modo producción
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Obtener la URL del servidor
    pub fn server_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_memory_defaults() {
        let config = EnvironmentConfig::from_lookup(lookup(&[("TRACKING_STORAGE", "memory")]))
            .unwrap();

        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.database.is_none());
        assert_eq!(config.server_url(), "0.0.0.0:3000");
        assert_eq!(config.broker.topic_prefix, "tracking");
        assert_eq!(config.broker.dispatch_status_stream, "dispatch.status.changed");
        assert_eq!(config.broker.consumer_group, "trip-tracking");
        assert_eq!(config.tracking.route_history_cap, 2000);
        assert!(config.is_development());
    }

    #[test]
    fn test_postgres_requires_database_url() {
        assert!(EnvironmentConfig::from_lookup(lookup(&[])).is_err());

        let config = EnvironmentConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://tracker:secret@db/tracking"),
            ("DATABASE_MAX_CONNECTIONS", "8"),
            ("PORT", "8080"),
            ("BROKER_CONSUMER_NAME", "tracker-b"),
        ]))
        .unwrap();
        let database = config.database.unwrap();
        assert_eq!(database.max_connections, 8);
        assert_eq!(database.min_connections, 2);
        assert_eq!(config.port, 8080);
        assert_eq!(config.broker.consumer_name, "tracker-b");
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(EnvironmentConfig::from_lookup(lookup(&[
            ("TRACKING_STORAGE", "memory"),
            ("PORT", "not-a-port"),
        ]))
        .is_err());
        assert!(EnvironmentConfig::from_lookup(lookup(&[
            ("TRACKING_STORAGE", "memory"),
            ("ROUTE_HISTORY_CAP", "0"),
        ]))
        .is_err());
        assert!(EnvironmentConfig::from_lookup(lookup(&[("TRACKING_STORAGE", "sqlite")])).is_err());
    }
}
