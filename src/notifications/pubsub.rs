use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

use super::NotificationTransport;
use crate::domain::order::Notification;
use crate::health::HealthStatus;

/// Publishes notifications as JSON on a Redis pub/sub channel.
///
/// `ConnectionManager` reconnects on its own; a failed publish marks the
/// transport degraded until the next success.
pub struct RedisTransport {
    conn: ConnectionManager,
    channel: String,
    last_publish_failed: AtomicBool,
}

impl RedisTransport {
    pub async fn connect(url: &str, channel: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let channel = channel.into();

        tracing::info!(channel = %channel, "Connected to Redis for notifications");

        Ok(Self {
            conn,
            channel,
            last_publish_failed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl NotificationTransport for RedisTransport {
    fn name(&self) -> &str {
        "redis"
    }

    async fn publish(&self, notification: &Notification) -> anyhow::Result<()> {
        let payload = notification.to_json()?;
        let mut conn = self.conn.clone();

        let result: redis::RedisResult<i64> = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(receivers) => {
                self.last_publish_failed.store(false, Ordering::Relaxed);
                tracing::debug!(
                    channel = %self.channel,
                    event_id = %notification.event_id,
                    receivers = receivers,
                    "Published to Redis"
                );
                Ok(())
            }
            Err(e) => {
                self.last_publish_failed.store(true, Ordering::Relaxed);
                Err(anyhow::anyhow!("Redis publish error: {}", e))
            }
        }
    }

    fn health(&self) -> HealthStatus {
        if self.last_publish_failed.load(Ordering::Relaxed) {
            HealthStatus::Degraded("last publish failed".to_string())
        } else {
            HealthStatus::Healthy
        }
    }
}
