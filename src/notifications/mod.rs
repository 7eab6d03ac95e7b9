mod kafka;
mod pubsub;

pub use kafka::KafkaTransport;
pub use pubsub::RedisTransport;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::domain::order::{ChangeEvent, Notification, OptionId, OrderId};
use crate::health::{ComponentHealth, HealthStatus};
use crate::metrics::{HealthSource, Metrics};
use crate::utils::{retry_with_backoff, CircuitState, RetryPolicy};

// ============================================================================
// Change Notifier
// ============================================================================
//
// The engine raises change events through `ChangeNotifier` after a commit.
// `NotificationHub` fans each event out two ways:
//
//   notify_*() ──▶ broadcast channel ──▶ in-process observers (subscribe())
//              └─▶ bounded FIFO queue ──▶ dispatcher task ──▶ transport 1, 2 ...
//
// Raising never blocks and never fails. A single dispatcher keeps delivery in
// the order events were raised; transport errors are retried, then logged and
// counted. When the queue is full the event still reaches observers but is
// dropped for the transports and counted in `notifications_dropped_total`.
//
// ============================================================================

/// Fire-and-forget sink for order change events
pub trait ChangeNotifier: Send + Sync {
    fn notify_order_changed(&self, order_id: OrderId);
    fn notify_orders_changed(&self, order_ids: &[OrderId]);
    fn notify_low_stock(&self, option_id: OptionId);
}

/// External system a notification is published to
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, notification: &Notification) -> anyhow::Result<()>;

    fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    /// Breaker state for transports guarded by one
    fn circuit_state(&self) -> Option<CircuitState> {
        None
    }
}

pub struct NotificationHub {
    observers: broadcast::Sender<Notification>,
    queue: Mutex<Option<mpsc::Sender<Notification>>>,
    transports: Vec<Arc<dyn NotificationTransport>>,
    metrics: Arc<Metrics>,
}

impl NotificationHub {
    /// Build the hub and spawn its dispatcher on the current runtime.
    ///
    /// The returned handle completes once `shutdown` was called and the queue
    /// has drained.
    pub fn start(
        channel_capacity: usize,
        queue_capacity: usize,
        policy: RetryPolicy,
        transports: Vec<Arc<dyn NotificationTransport>>,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (observers, _) = broadcast::channel(channel_capacity.max(1));
        let (queue, receiver) = mpsc::channel(queue_capacity.max(1));

        let dispatcher = tokio::spawn(run_dispatcher(
            receiver,
            transports.clone(),
            policy,
            metrics.clone(),
        ));

        let hub = Arc::new(Self {
            observers,
            queue: Mutex::new(Some(queue)),
            transports,
            metrics,
        });

        tracing::info!(
            transports = hub.transports.len(),
            queue_capacity = queue_capacity,
            "Notification hub started"
        );

        (hub, dispatcher)
    }

    /// Stream of every notification raised from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.observers.subscribe()
    }

    /// Stop accepting work for the dispatcher; queued events are still delivered
    pub fn shutdown(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        if queue.take().is_some() {
            tracing::info!("Notification hub shutting down");
        }
    }

    fn raise(&self, event: ChangeEvent) {
        let notification = Notification::new(event);

        tracing::debug!(
            event_id = %notification.event_id,
            event_type = %notification.event_type,
            "Raising notification"
        );

        // No receivers is fine: nobody is watching
        let _ = self.observers.send(notification.clone());

        if self.transports.is_empty() {
            return;
        }

        let queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        let Some(sender) = queue.as_ref() else {
            tracing::warn!("Notification hub shut down, external delivery skipped");
            return;
        };

        match sender.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                self.metrics.record_dropped(&dropped.event_type);
                tracing::warn!(
                    event_id = %dropped.event_id,
                    event_type = %dropped.event_type,
                    "Notification queue full, external delivery skipped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Notification dispatcher not running, external delivery skipped");
            }
        }
    }
}

impl ChangeNotifier for NotificationHub {
    fn notify_order_changed(&self, order_id: OrderId) {
        self.raise(ChangeEvent::OrderChanged { order_id });
    }

    fn notify_orders_changed(&self, order_ids: &[OrderId]) {
        self.raise(ChangeEvent::OrdersChanged {
            order_ids: order_ids.to_vec(),
        });
    }

    fn notify_low_stock(&self, option_id: OptionId) {
        self.raise(ChangeEvent::LowStock { option_id });
    }
}

impl HealthSource for NotificationHub {
    fn component_health(&self) -> Vec<ComponentHealth> {
        let dispatcher = {
            let queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
            match queue.as_ref() {
                Some(sender) if !sender.is_closed() => HealthStatus::Healthy,
                Some(_) => HealthStatus::Unhealthy("dispatcher task exited".to_string()),
                None => HealthStatus::Degraded("shutting down".to_string()),
            }
        };

        let mut components = vec![ComponentHealth::new("notification-dispatcher", dispatcher)];
        components.extend(
            self.transports
                .iter()
                .map(|t| ComponentHealth::new(t.name(), t.health())),
        );
        components
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

async fn run_dispatcher(
    mut receiver: mpsc::Receiver<Notification>,
    transports: Vec<Arc<dyn NotificationTransport>>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
) {
    while let Some(notification) = receiver.recv().await {
        for transport in &transports {
            deliver(transport.as_ref(), &notification, &policy, &metrics).await;
        }
    }

    tracing::info!("Notification dispatcher stopped");
}

async fn deliver(
    transport: &dyn NotificationTransport,
    notification: &Notification,
    policy: &RetryPolicy,
    metrics: &Metrics,
) {
    let name = transport.name();

    let result = retry_with_backoff(policy, name, move |attempt| {
        if attempt > 1 {
            metrics.record_retry_attempt(name);
        }
        transport.publish(notification)
    })
    .await;

    match result {
        Ok(()) => {
            metrics.record_publish(name, &notification.event_type, true);
            tracing::debug!(
                transport = %name,
                event_id = %notification.event_id,
                "Notification published"
            );
        }
        Err(exhausted) => {
            metrics.record_publish(name, &notification.event_type, false);
            tracing::error!(
                transport = %name,
                event_id = %notification.event_id,
                event_type = %notification.event_type,
                attempts = exhausted.attempts,
                error = %exhausted.last_error,
                "Dropping notification"
            );
        }
    }

    if let Some(state) = transport.circuit_state() {
        metrics.update_circuit_breaker_state(name, state);
    }
}
