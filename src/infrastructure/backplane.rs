//! Backplane Implementations
//!
//! Redis pub/sub transport for multi-instance fan-out, plus an in-process
//! loopback used by tests and single-node development.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::config::RedisSettings;
use crate::domain::Backplane;
use crate::shared::error::AppError;

/// Creates a Redis connection manager with automatic reconnection.
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<ConnectionManager, redis::RedisError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    info!("Redis connection established");
    Ok(manager)
}

/// Redis-backed backplane.
///
/// Publishes through a shared `ConnectionManager`; each subscription opens
/// its own pub/sub connection and forwards messages onto an mpsc channel.
pub struct RedisBackplane {
    publisher: ConnectionManager,
    client: Client,
}

impl RedisBackplane {
    pub async fn connect(settings: &RedisSettings) -> Result<Self, AppError> {
        let client = Client::open(settings.url.as_str())?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        Ok(Self { publisher, client })
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError> {
        let mut conn = self.publisher.clone();
        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(|e| AppError::BackplaneUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, AppError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| AppError::BackplaneUnavailable(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| AppError::BackplaneUnavailable(e.to_string()))?;

        let channel = channel.to_string();
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Dropping unreadable backplane message");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    debug!(channel = %channel, "Backplane receiver dropped, stopping listener");
                    break;
                }
            }
        });

        Ok(rx)
    }
}

/// In-process backplane over a tokio broadcast channel.
///
/// Every clone shares the same bus, so two `LoopbackBackplane` handles
/// behave like two instances connected to the same broker.
#[derive(Clone)]
pub struct LoopbackBackplane {
    bus: broadcast::Sender<(String, String)>,
}

impl LoopbackBackplane {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(1024);
        Self { bus }
    }
}

impl Default for LoopbackBackplane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backplane for LoopbackBackplane {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError> {
        // A send with no subscribers is not a failure; it matches a broker
        // with no listening instances.
        let _ = self.bus.send((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, AppError> {
        let mut bus_rx = self.bus.subscribe();
        let channel = channel.to_string();
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok((ch, payload)) if ch == channel => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(channel = %channel, skipped = n, "Loopback subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}
