//! Publicadores en memoria
//!
//! `ChannelPublisher` reenvía cada mensaje a un canal mpsc para que los
//! tests puedan esperarlo; `FailingPublisher` simula un broker caído.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::MessagePublisher;

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Value,
}

#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<PublishedMessage>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessagePublisher for ChannelPublisher {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        self.tx
            .send(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            })
            .map_err(|_| anyhow!("receiver dropped"))
    }
}

pub struct FailingPublisher;

#[async_trait]
impl MessagePublisher for FailingPublisher {
    async fn publish(&self, topic: &str, _payload: &Value) -> Result<()> {
        Err(anyhow!("broker unreachable for {}", topic))
    }
}

/// Descarta los mensajes; se usa cuando Redis no está disponible en local
pub struct NullPublisher;

#[async_trait]
impl MessagePublisher for NullPublisher {
    async fn publish(&self, topic: &str, _payload: &Value) -> Result<()> {
        tracing::debug!("Broker deshabilitado, mensaje en {} descartado", topic);
        Ok(())
    }
}
