//! Configuración del broker
//!
//! Este módulo contiene la configuración de Redis Streams, que hace de
//! broker durable tanto de salida como de entrada.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub redis_url: String,
    pub topic_prefix: String,
    /// Longitud aproximada máxima de cada stream (XADD MAXLEN ~)
    pub stream_max_len: usize,
    pub dispatch_assigned_stream: String,
    pub dispatch_status_stream: String,
    /// Consumer group de los streams de entrada
    pub consumer_group: String,
    /// Nombre de este consumidor dentro del grupo; estable entre reinicios
    pub consumer_name: String,
    /// Tiempo de bloqueo de XREADGROUP en milisegundos
    pub read_block_ms: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            topic_prefix: "tracking".to_string(),
            stream_max_len: 100_000,
            dispatch_assigned_stream: "dispatch.assigned".to_string(),
            dispatch_status_stream: "dispatch.status.changed".to_string(),
            consumer_group: "trip-tracking".to_string(),
            consumer_name: "trip-tracking-1".to_string(),
            read_block_ms: 5_000,
        }
    }
}
