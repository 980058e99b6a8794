use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use dotenvy::dotenv;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use trip_tracking::broker::{
    MessagePublisher, NullPublisher, RedisStreamConsumer, RedisStreamPublisher,
};
use trip_tracking::config::{BrokerConfig, EnvironmentConfig, StorageBackend};
use trip_tracking::database::{create_pool, run_migrations};
use trip_tracking::repositories::Stores;
use trip_tracking::services::{should_ack, DispatchSync};
use trip_tracking::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Cargar variables de entorno
    dotenv().ok();
    let config = EnvironmentConfig::from_env()?;

    // Configurar logging
    let level = config
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("🚚 Trip Tracking & Lifecycle Engine");
    info!("====================================");
    info!("🌍 Entorno: {} | almacenamiento: {}", config.environment, config.storage.as_str());

    // Inicializar almacenamiento
    let stores = match (&config.storage, &config.database) {
        (StorageBackend::Postgres, Some(database)) => {
            let pool = create_pool(database).await.map_err(|e| {
                error!("❌ Error conectando a la base de datos: {}", e);
                e
            })?;
            run_migrations(&pool).await?;
            Stores::postgres(pool)
        }
        (StorageBackend::Postgres, None) => {
            return Err(anyhow::anyhow!("DATABASE_URL is required for postgres storage"));
        }
        (StorageBackend::Memory, _) => {
            warn!("⚠️ Almacenamiento en memoria: los datos se pierden al reiniciar");
            Stores::in_memory()
        }
    };

    // Inicializar broker
    let redis_publisher = match RedisStreamPublisher::new(config.broker.clone()).await {
        Ok(publisher) => Some(publisher),
        Err(e) if config.is_production() => {
            error!("❌ Error conectando a Redis: {}", e);
            return Err(e);
        }
        Err(e) => {
            warn!("⚠️ Redis no disponible ({}), mensajes deshabilitados", e);
            None
        }
    };
    let publisher: Arc<dyn MessagePublisher> = match redis_publisher.clone() {
        Some(publisher) => Arc::new(publisher),
        None => Arc::new(NullPublisher),
    };

    let state = AppState::new(stores, publisher, &config.broker, config.tracking.clone());

    if redis_publisher.is_some() {
        tokio::spawn(consume_dispatch_signals(
            state.dispatch.clone(),
            config.broker.clone(),
        ));
    }

    let storage = config.storage.as_str();
    let app = Router::new().route(
        "/health",
        get(move || health(storage, redis_publisher.clone())),
    );

    let addr: SocketAddr = config.server_url().parse()?;
    info!("🌐 Servidor iniciando en http://{}", addr);
    info!("   GET  /health - Estado del servicio");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!("❌ Error del servidor: {}", e);
            e
        })?;

    info!("👋 Servidor terminado");
    Ok(())
}

/// Bucle de lectura de las señales de despacho entrantes
async fn consume_dispatch_signals(dispatch: DispatchSync, config: BrokerConfig) {
    let mut consumer = match RedisStreamConsumer::new(&config).await {
        Ok(consumer) => consumer,
        Err(e) => {
            error!("❌ No se pudo iniciar el consumidor de despacho: {}", e);
            return;
        }
    };

    loop {
        match consumer.next_batch().await {
            Ok(messages) => {
                for message in messages {
                    let result = dispatch.handle_inbound(message.clone()).await;
                    if let Err(e) = &result {
                        error!("❌ Error procesando señal de despacho {}: {}", message.id, e);
                    }
                    if !should_ack(&result) {
                        warn!("⏳ Señal {} queda pendiente para reintento", message.id);
                        continue;
                    }
                    if let Err(e) = consumer.ack(&message).await {
                        error!("❌ {}", e);
                    }
                }
            }
            Err(e) => {
                error!("❌ Error leyendo streams de despacho: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn health(storage: &'static str, redis: Option<RedisStreamPublisher>) -> Json<Value> {
    let broker = match redis {
        Some(publisher) if publisher.is_connected().await => "connected",
        Some(_) => "disconnected",
        None => "disabled",
    };

    Json(json!({
        "status": "ok",
        "storage": storage,
        "broker": broker,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Señal de apagado graceful
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ No se pudo instalar el handler de Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("❌ No se pudo instalar el handler de SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("🛑 Señal Ctrl+C recibida, apagando servidor...");
        },
        _ = terminate => {
            info!("🛑 Señal de terminación recibida, apagando servidor...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_disabled_broker() {
        let Json(body) = health("memory", None).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "memory");
        assert_eq!(body["broker"], "disabled");
    }
}
