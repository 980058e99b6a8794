//! Broker de mensajes
//!
//! Este módulo contiene el canal de notificación asíncrono. La base de
//! datos es la fuente de verdad: publicar es best-effort y nunca falla
//! una operación ya confirmada.

pub mod broker_config;
pub mod memory;
pub mod redis_broker;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub use broker_config::BrokerConfig;
pub use memory::{ChannelPublisher, FailingPublisher, NullPublisher, PublishedMessage};
pub use redis_broker::{InboundMessage, RedisStreamConsumer, RedisStreamPublisher};

/// Acciones publicadas (sin prefijo de topic)
pub mod topics {
    pub const TRIP_CREATED: &str = "trip.created";
    pub const TRIP_STATUS_CHANGED: &str = "trip.status.changed";
    pub const TRIP_CLOSED: &str = "trip.closed";
    pub const EVENT_CREATED: &str = "event.created";
    pub const EXCEPTION_RAISED: &str = "exception.raised";
    pub const EXCEPTION_RESOLVED: &str = "exception.resolved";
}

/// Operaciones de publicación sobre un broker durable
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()>;
}

/// Publicador fire-and-forget con prefijo de topic
#[derive(Clone)]
pub struct EventBus {
    publisher: Arc<dyn MessagePublisher>,
    prefix: String,
}

impl EventBus {
    pub fn new(publisher: Arc<dyn MessagePublisher>, prefix: impl Into<String>) -> Self {
        Self {
            publisher,
            prefix: prefix.into(),
        }
    }

    pub fn topic(&self, action: &str) -> String {
        format!("{}.{}", self.prefix, action)
    }

    /// Publica en una tarea separada. Agrega `timestamp` ISO-8601 al cuerpo.
    /// El error se registra y se descarta; el handle solo sirve para esperar.
    pub fn emit(&self, action: &str, mut body: Value) -> JoinHandle<()> {
        if let Value::Object(map) = &mut body {
            map.entry("timestamp")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        }

        let topic = self.topic(action);
        let publisher = self.publisher.clone();

        tokio::spawn(async move {
            match publisher.publish(&topic, &body).await {
                Ok(()) => debug!("📤 Mensaje publicado en {}", topic),
                Err(e) => error!("❌ Error publicando en {} (se descarta): {}", topic, e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_prefixes_topic_and_adds_timestamp() {
        let (publisher, mut rx) = ChannelPublisher::new();
        let bus = EventBus::new(Arc::new(publisher), "tracking");

        bus.emit(topics::TRIP_CREATED, json!({ "trip_id": "t-1" }))
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "tracking.trip.created");
        assert_eq!(message.payload["trip_id"], "t-1");
        assert!(message.payload["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_emit_swallows_publisher_failure() {
        let bus = EventBus::new(Arc::new(FailingPublisher), "tracking");
        let handle = bus.emit(topics::TRIP_CLOSED, json!({ "trip_id": "t-2" }));
        // La tarea termina sin pánico aunque el broker falle
        assert!(handle.await.is_ok());
    }
}
