use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_lifecycle::codec::FieldCipher;
use order_lifecycle::config::AppConfig;
use order_lifecycle::domain::order::OrderLifecycleEngine;
use order_lifecycle::metrics::{self, HealthSource, Metrics};
use order_lifecycle::notifications::{
    KafkaTransport, NotificationHub, NotificationTransport, RedisTransport,
};
use order_lifecycle::store::PgOrderRepository;
use order_lifecycle::utils::RetryPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, overridable with RUST_LOG
    // Example: RUST_LOG=order_lifecycle=trace cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_lifecycle=debug")),
        )
        .init();

    tracing::info!("Starting order lifecycle service");

    // === 1. Configuration ===
    let config = AppConfig::load(None)?;
    let cipher = FieldCipher::new(&config.encryption.key)?;
    tracing::debug!(config = ?config, "Configuration loaded");

    // === 2. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!(
        families = metrics.registry().gather().len(),
        "Metrics registry created"
    );

    // === 3. PostgreSQL ===
    let repository = Arc::new(PgOrderRepository::connect(&config.database).await?);
    repository.migrate().await?;

    // === 4. Notification transports ===
    let mut transports: Vec<Arc<dyn NotificationTransport>> = Vec::new();

    if let Some(url) = &config.notifications.redis_url {
        let channel = config.notifications.redis_channel.clone();
        let redis = RedisTransport::connect(url, channel).await?;
        transports.push(Arc::new(redis));
    }

    if let Some(brokers) = &config.notifications.kafka_brokers {
        let kafka = KafkaTransport::new(brokers, config.notifications.kafka_topic.clone())?;
        transports.push(Arc::new(kafka));
    }

    if transports.is_empty() {
        tracing::warn!("No notification transports configured, in-process observers only");
    }

    let (hub, dispatcher) = NotificationHub::start(
        config.notifications.channel_capacity,
        config.notifications.queue_capacity,
        RetryPolicy::with_max_attempts(config.notifications.max_publish_attempts),
        transports,
        metrics.clone(),
    );

    // === 5. Metrics server in its own actix system ===
    if config.metrics.enabled {
        let registry = metrics.registry().clone();
        let health: Arc<dyn HealthSource> = hub.clone();
        let port = config.metrics.port;

        std::thread::spawn(move || {
            let system = actix_web::rt::System::new();
            let server = metrics::start_metrics_server(registry, health, port);
            if let Err(e) = system.block_on(server) {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    }

    // === 6. Engine ===
    // Request handlers are mounted by the embedding HTTP service and share this
    // instance.
    let engine = Arc::new(OrderLifecycleEngine::new(
        repository,
        hub.clone(),
        cipher,
        metrics.clone(),
        config.lifecycle.clone(),
    ));

    // Stored emails must decrypt with the configured key
    let stored = engine.get_all().await?;
    tracing::info!(orders = stored.len(), "Stored orders readable with configured key");

    // Log every change raised in this process
    let mut observer = hub.subscribe();
    let observer_task = tokio::spawn(async move {
        loop {
            match observer.recv().await {
                Ok(notification) => tracing::info!(
                    event_id = %notification.event_id,
                    event_type = %notification.event_type,
                    keys = ?notification.event.partition_keys(),
                    "Order change observed"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Observer lagged behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tracing::info!("Order lifecycle engine ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    hub.shutdown();
    if let Err(e) = dispatcher.await {
        tracing::error!(error = %e, "Notification dispatcher panicked");
    }
    observer_task.abort();
    drop(engine);

    tracing::info!("Order lifecycle service stopped");
    Ok(())
}
