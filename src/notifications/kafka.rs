use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};

use super::NotificationTransport;
use crate::domain::order::Notification;
use crate::health::HealthStatus;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka/Redpanda producer keyed by entity. An event is sent once per key it
/// carries, so a batch event reaches the partition of every order it names and
/// each order's events stay in raise order. A failed send is retried as a
/// whole; consumers deduplicate on `event_id`.
pub struct KafkaTransport {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
}

impl KafkaTransport {
    pub fn new(brokers: &str, topic: impl Into<String>) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 3,
        };

        let topic = topic.into();
        tracing::info!(brokers = %brokers, topic = %topic, "Kafka producer created");

        Ok(Self {
            producer,
            topic,
            circuit_breaker: CircuitBreaker::new("kafka", cb_config),
        })
    }
}

#[async_trait]
impl NotificationTransport for KafkaTransport {
    fn name(&self) -> &str {
        "kafka"
    }

    async fn publish(&self, notification: &Notification) -> anyhow::Result<()> {
        let payload = notification.to_json()?;

        for key in notification.event.partition_keys() {
            let result = self
                .circuit_breaker
                .call(async {
                    let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

                    self.producer
                        .send(record, Timeout::After(SEND_TIMEOUT))
                        .await
                        .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))
                })
                .await;

            match result {
                Ok(_delivery) => {
                    tracing::debug!(
                        topic = %self.topic,
                        key = %key,
                        event_id = %notification.event_id,
                        "Published to Kafka"
                    );
                }
                Err(CircuitBreakerError::Open) => {
                    anyhow::bail!("Circuit breaker open for topic {}", self.topic);
                }
                Err(CircuitBreakerError::Failed(e)) => return Err(e),
            }
        }

        Ok(())
    }

    fn health(&self) -> HealthStatus {
        match self.circuit_breaker.state() {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("circuit half-open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("circuit open".to_string()),
        }
    }

    fn circuit_state(&self) -> Option<CircuitState> {
        Some(self.circuit_breaker.state())
    }
}
