use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{BrokerConfig, MessagePublisher};

/// Campo del entry de stream que lleva el JSON
const PAYLOAD_FIELD: &str = "payload";

async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    // Test de conexión usando un comando simple
    let mut conn = manager.clone();
    let _: () = redis::cmd("PING").query_async(&mut conn).await?;

    Ok(manager)
}

/// Publicador sobre Redis Streams (un stream por topic)
#[derive(Clone)]
pub struct RedisStreamPublisher {
    manager: ConnectionManager,
    config: BrokerConfig,
}

impl RedisStreamPublisher {
    pub async fn new(config: BrokerConfig) -> Result<Self> {
        info!("🔗 Conectando publicador a Redis: {}", config.redis_url);
        let manager = connect(&config.redis_url).await?;
        info!("✅ Publicador Redis conectado");

        Ok(Self { manager, config })
    }

    /// Verificar si Redis está conectado
    pub async fn is_connected(&self) -> bool {
        let mut conn = self.manager.clone();
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(response) => response == "PONG",
            Err(_) => false,
        }
    }
}

#[async_trait]
impl MessagePublisher for RedisStreamPublisher {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        let mut conn = self.manager.clone();
        let body = serde_json::to_string(payload)?;

        let entry_id: String = conn
            .xadd_maxlen(
                topic,
                StreamMaxlen::Approx(self.config.stream_max_len),
                "*",
                &[(PAYLOAD_FIELD, body)],
            )
            .await
            .with_context(|| format!("XADD {} failed", topic))?;

        debug!("💾 XADD {} -> {}", topic, entry_id);
        Ok(())
    }
}

/// Mensaje leído de un stream de entrada
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub stream: String,
    pub id: String,
    pub payload: Value,
}

/// Id de lectura para entradas nunca entregadas al grupo
const NEW_ENTRIES: &str = ">";

/// Consumidor de las señales de despacho entrantes dentro de un consumer
/// group. Usa su propia conexión: XREADGROUP BLOCK no debe frenar las
/// publicaciones.
///
/// Al arrancar relee primero las entradas pendientes (entregadas y sin
/// XACK) de este consumidor; después pasa a las nuevas.
pub struct RedisStreamConsumer {
    manager: ConnectionManager,
    group: String,
    consumer: String,
    streams: Vec<String>,
    /// Por stream: último id pendiente releído, o `>` en régimen normal
    cursors: Vec<String>,
    block_ms: usize,
}

impl RedisStreamConsumer {
    pub async fn new(config: &BrokerConfig) -> Result<Self> {
        let manager = connect(&config.redis_url).await?;
        let streams = vec![
            config.dispatch_assigned_stream.clone(),
            config.dispatch_status_stream.clone(),
        ];

        let mut conn = manager.clone();
        for stream in &streams {
            // "$": el grupo empieza en el final la primera vez; desde ahí
            // Redis guarda la posición aunque el proceso caiga
            let created: redis::RedisResult<()> = conn
                .xgroup_create_mkstream(stream, &config.consumer_group, "$")
                .await;
            match created {
                Ok(()) => info!("🆕 Grupo {} creado en {}", config.consumer_group, stream),
                Err(e) if e.code() == Some("BUSYGROUP") => {
                    debug!("Grupo {} ya existe en {}", config.consumer_group, stream)
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("XGROUP CREATE {} failed", stream))
                }
            }
        }
        info!(
            "📥 Consumidor {}/{} escuchando streams: {:?}",
            config.consumer_group, config.consumer_name, streams
        );

        Ok(Self {
            manager,
            group: config.consumer_group.clone(),
            consumer: config.consumer_name.clone(),
            cursors: vec!["0".to_string(); streams.len()],
            streams,
            block_ms: config.read_block_ms,
        })
    }

    fn replaying(&self) -> bool {
        self.cursors.iter().any(|c| c != NEW_ENTRIES)
    }

    /// Siguiente lote: pendientes mientras queden, luego nuevas
    /// (vacío si vence el BLOCK)
    pub async fn next_batch(&mut self) -> Result<Vec<InboundMessage>> {
        let mut conn = self.manager.clone();
        let replaying = self.replaying();
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(100);
        if !replaying {
            options = options.block(self.block_ms);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(self.streams.as_slice(), self.cursors.as_slice(), &options)
            .await?;

        let mut messages = Vec::new();
        let mut delivered = vec![false; self.streams.len()];
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            let Some(position) = self.streams.iter().position(|s| *s == key.key) else {
                continue;
            };
            for entry in key.ids {
                delivered[position] = true;
                if self.cursors[position] != NEW_ENTRIES {
                    self.cursors[position] = entry.id.clone();
                }

                let payload = entry
                    .get::<String>(PAYLOAD_FIELD)
                    .map(|raw| serde_json::from_str::<Value>(&raw));
                match payload {
                    Some(Ok(payload)) => messages.push(InboundMessage {
                        stream: key.key.clone(),
                        id: entry.id.clone(),
                        payload,
                    }),
                    Some(Err(e)) => {
                        warn!("⚠️ Payload inválido en {} ({}): {}", key.key, entry.id, e);
                        self.ack_entry(&key.key, &entry.id).await?;
                    }
                    None => {
                        warn!("⚠️ Entrada {} en {} sin campo payload", entry.id, key.key);
                        self.ack_entry(&key.key, &entry.id).await?;
                    }
                }
            }
        }

        if replaying {
            for (position, cursor) in self.cursors.iter_mut().enumerate() {
                if !delivered[position] && cursor != NEW_ENTRIES {
                    debug!("Pendientes de {} releídos", self.streams[position]);
                    *cursor = NEW_ENTRIES.to_string();
                }
            }
        }

        Ok(messages)
    }

    /// XACK: el mensaje sale de la lista de pendientes del grupo
    pub async fn ack(&self, message: &InboundMessage) -> Result<()> {
        self.ack_entry(&message.stream, &message.id).await
    }

    async fn ack_entry(&self, stream: &str, id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .xack(stream, &self.group, &[id])
            .await
            .with_context(|| format!("XACK {} {} failed", stream, id))?;
        debug!("✔️ XACK {} {}", stream, id);
        Ok(())
    }
}
