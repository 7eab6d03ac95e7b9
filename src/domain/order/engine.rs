use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SubsecRound, Utc};

use crate::codec::FieldCipher;
use crate::config::LifecycleConfig;
use crate::metrics::Metrics;
use crate::notifications::ChangeNotifier;
use crate::store::{OrderFilter, OrderRepository, StoreError};

use super::aggregate::{NewOrder, Order, StatusChange, UnsavedRecipient};
use super::commands::{NewRecipient, OrderDraft};
use super::errors::OrderError;
use super::value_objects::{DeliveryOutcome, OrderId, RecipientId, UserId};
use super::views::OrderView;

// ============================================================================
// Order Lifecycle Engine
// ============================================================================
//
// Orchestrates: load → mutate aggregates → persist (one transaction) → notify
//
// - Every repository call runs under the configured persistence deadline. A
//   call that overruns is dropped, which rolls back its open transaction.
// - Notifications are raised only after a successful commit and can never
//   fail the operation.
// - Batch operations accept partial id matches; zero matches is NotFound.
// - Writes are conditional on the version each order was loaded at. An order
//   changed by a concurrent request fails the batch with `Conflict`.
//
// ============================================================================

pub struct OrderLifecycleEngine {
    repository: Arc<dyn OrderRepository>,
    notifier: Arc<dyn ChangeNotifier>,
    cipher: FieldCipher,
    metrics: Arc<Metrics>,
    config: LifecycleConfig,
}

impl OrderLifecycleEngine {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        notifier: Arc<dyn ChangeNotifier>,
        cipher: FieldCipher,
        metrics: Arc<Metrics>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            repository,
            notifier,
            cipher,
            metrics,
            config,
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Advance every matching order by one step of the transition table.
    ///
    /// Terminal orders keep their status but are still audit-stamped.
    pub async fn update_statuses(
        &self,
        order_ids: &[OrderId],
        updated_by: UserId,
        outcome: DeliveryOutcome,
    ) -> Result<Vec<StatusChange>, OrderError> {
        let result = async {
            let mut orders = self.load_existing(order_ids).await?;

            let now = timestamp();
            let changes: Vec<StatusChange> = orders
                .iter_mut()
                .map(|order| order.apply_outcome(outcome, updated_by, now))
                .collect();

            self.bounded(
                "save_orders",
                "Failed to update order statuses",
                self.repository.save_orders(&orders),
            )
            .await?;

            for change in changes.iter().filter(|c| !c.is_noop()) {
                self.metrics.record_transition(change.from, change.to);
                tracing::debug!(
                    order_id = change.order_id,
                    from = %change.from,
                    to = %change.to,
                    "Order status changed"
                );
            }

            let ids = ids_of(&orders);
            self.notifier.notify_orders_changed(&ids);

            tracing::info!(
                orders = ids.len(),
                outcome = ?outcome,
                updated_by = updated_by,
                "Order statuses updated"
            );

            Ok::<_, OrderError>(changes)
        }
        .await;

        self.finish("update_statuses", result)
    }

    /// Set the deliveryman on every matching order. The caller checks the role.
    pub async fn assign_deliveryman(
        &self,
        order_ids: &[OrderId],
        deliveryman_id: UserId,
        updated_by: UserId,
    ) -> Result<Vec<OrderId>, OrderError> {
        let result = async {
            let mut orders = self.load_existing(order_ids).await?;

            let now = timestamp();
            for order in orders.iter_mut() {
                order.assign_deliveryman(deliveryman_id, updated_by, now);
            }

            self.bounded(
                "save_orders",
                "Failed to assign deliveryman",
                self.repository.save_orders(&orders),
            )
            .await?;

            let ids = ids_of(&orders);
            self.notifier.notify_orders_changed(&ids);

            tracing::info!(
                orders = ids.len(),
                deliveryman_id = deliveryman_id,
                updated_by = updated_by,
                "Deliveryman assigned"
            );

            Ok::<_, OrderError>(ids)
        }
        .await;

        self.finish("assign_deliveryman", result)
    }

    /// Store one recipient and link it to every matching order, in one
    /// transaction.
    ///
    /// The receive time is stamped here; any caller-supplied time is dropped.
    pub async fn record_recipient(
        &self,
        order_ids: &[OrderId],
        recipient: NewRecipient,
        updated_by: UserId,
    ) -> Result<RecipientId, OrderError> {
        let result = async {
            let mut orders = self.load_existing(order_ids).await?;

            let now = timestamp();
            let unsaved = UnsavedRecipient::stamp(recipient, now);
            for order in orders.iter_mut() {
                order.stamp(updated_by, now);
            }

            let saved = self
                .bounded(
                    "save_recipient_for_orders",
                    "Failed to save recipient",
                    self.repository.save_recipient_for_orders(&unsaved, &orders),
                )
                .await?;

            let ids = ids_of(&orders);
            self.notifier.notify_orders_changed(&ids);

            tracing::info!(
                recipient_id = saved.id,
                orders = ids.len(),
                updated_by = updated_by,
                "Recipient recorded"
            );

            Ok::<_, OrderError>(saved.id)
        }
        .await;

        self.finish("record_recipient", result)
    }

    /// Validate, encrypt and insert a new order in the Accepted state.
    pub async fn create_order(&self, draft: OrderDraft) -> Result<Order, OrderError> {
        let result = async {
            let new_order = NewOrder::prepare(draft, &self.cipher, timestamp())?;

            let inserted = self
                .bounded(
                    "insert_order",
                    "Failed to save order",
                    self.repository
                        .insert_order(new_order, self.config.low_stock_threshold),
                )
                .await?;

            let order = inserted.order;
            self.metrics.orders_created.inc();
            self.notifier.notify_order_changed(order.id);

            for option_id in inserted.low_stock {
                tracing::warn!(
                    option_id = option_id,
                    threshold = self.config.low_stock_threshold,
                    "Option stock is low"
                );
                self.notifier.notify_low_stock(option_id);
            }

            tracing::info!(
                order_id = order.id,
                reference_number = %order.reference_number,
                items = order.items.len(),
                "Order created"
            );

            Ok::<_, OrderError>(order)
        }
        .await;

        self.finish("create_order", result)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_all(&self) -> Result<Vec<OrderView>, OrderError> {
        let records = self
            .bounded(
                "load_order_records",
                "Failed to load orders",
                self.repository.load_order_records(&OrderFilter::All),
            )
            .await?;

        records
            .into_iter()
            .map(|record| record.decrypt(&self.cipher).map_err(OrderError::from))
            .collect()
    }

    pub async fn get_by_id(&self, order_id: OrderId) -> Result<OrderView, OrderError> {
        let records = self
            .bounded(
                "load_order_records",
                "Failed to load order",
                self.repository.load_order_records(&OrderFilter::single(order_id)),
            )
            .await?;

        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| OrderError::NotFound(format!("Order {} not found", order_id)))?;

        Ok(record.decrypt(&self.cipher)?)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load_existing(&self, order_ids: &[OrderId]) -> Result<Vec<Order>, OrderError> {
        if order_ids.is_empty() {
            return Err(OrderError::Validation(
                "At least one order id is required".to_string(),
            ));
        }

        let filter = OrderFilter::ids(order_ids.iter().copied());
        let orders = self
            .bounded(
                "load_orders",
                "Failed to load orders",
                self.repository.load_orders(&filter),
            )
            .await?;

        if orders.is_empty() {
            return Err(OrderError::NotFound(format!(
                "No orders found for ids {:?}",
                order_ids
            )));
        }

        if let OrderFilter::Ids(requested) = &filter {
            if orders.len() < requested.len() {
                let missing: Vec<OrderId> = requested
                    .iter()
                    .copied()
                    .filter(|id| !orders.iter().any(|o| o.id == *id))
                    .collect();
                tracing::warn!(
                    missing = ?missing,
                    "Some requested orders do not exist, continuing with the rest"
                );
            }
        }

        Ok(orders)
    }

    /// Run a repository call under the persistence deadline
    async fn bounded<T, F>(
        &self,
        call: &'static str,
        summary: &str,
        future: F,
    ) -> Result<T, OrderError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.config.persistence_timeout();
        let started = Instant::now();

        let outcome = tokio::time::timeout(timeout, future).await;
        self.metrics
            .observe_persistence(call, started.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => result.map_err(|e| OrderError::from_store(summary, e)),
            Err(_) => {
                tracing::error!(
                    call = call,
                    timeout_ms = timeout.as_millis() as u64,
                    "Persistence call timed out"
                );
                Err(OrderError::Timeout {
                    operation: call,
                    timeout,
                })
            }
        }
    }

    fn finish<T>(&self, operation: &str, result: Result<T, OrderError>) -> Result<T, OrderError> {
        self.metrics.record_operation(operation, result.is_ok());

        if let Err(e) = &result {
            tracing::warn!(
                operation = operation,
                kind = e.kind(),
                error = %e,
                "Operation failed"
            );
        }
        result
    }
}

fn ids_of(orders: &[Order]) -> Vec<OrderId> {
    orders.iter().map(|o| o.id).collect()
}

/// Current time at the microsecond precision the database stores
fn timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rust_decimal::Decimal;
    use tokio::sync::broadcast;

    use crate::domain::order::{ChangeEvent, DraftItem, Notification, OrderStatus};
    use crate::notifications::NotificationHub;
    use crate::store::InMemoryOrderRepository;
    use crate::utils::RetryPolicy;

    const KEY: &str = "0123456789abcdef0123456789abcdef";
    const ADMIN: UserId = 1;
    const DRIVER: UserId = 2;

    struct Harness {
        engine: OrderLifecycleEngine,
        repository: Arc<InMemoryOrderRepository>,
        events: broadcast::Receiver<Notification>,
    }

    async fn harness() -> Harness {
        harness_with(LifecycleConfig::default()).await
    }

    async fn harness_with(config: LifecycleConfig) -> Harness {
        let repository = Arc::new(InMemoryOrderRepository::new());
        repository.add_delivery_type(1, "Room delivery").await;
        repository.add_hotel(1, "Harbour View").await;
        repository.add_address(1, "Quay Street 4", Some(1)).await;
        repository.add_user(ADMIN, "Admin", "admin@shop.example").await;
        repository.add_user(DRIVER, "Driver", "driver@shop.example").await;
        repository.add_product(1, "Postcard").await;
        repository.add_option(10, 1, "A6 matte", 100).await;
        repository.add_option(11, 1, "A5 gloss", 6).await;

        let metrics = Arc::new(Metrics::new().unwrap());
        let (hub, _dispatcher) =
            NotificationHub::start(64, 64, RetryPolicy::default(), vec![], metrics.clone());
        let events = hub.subscribe();

        let engine = OrderLifecycleEngine::new(
            repository.clone(),
            hub,
            FieldCipher::new(KEY).unwrap(),
            metrics,
            config,
        );

        Harness {
            engine,
            repository,
            events,
        }
    }

    fn draft(option_id: i32, quantity: i32) -> OrderDraft {
        OrderDraft {
            subtotal: Decimal::new(1200, 2),
            total: Decimal::new(1500, 2),
            reference_number: None,
            request: None,
            customer_email: "guest@harbour.example".to_string(),
            delivery_type_id: 1,
            address_id: Some(1),
            status_id: None,
            updated_by: ADMIN,
            items: vec![DraftItem {
                option_id,
                quantity,
                image_url: "https://images.example/p.png".to_string(),
            }],
        }
    }

    fn drain(events: &mut broadcast::Receiver<Notification>) -> Vec<ChangeEvent> {
        let mut seen = Vec::new();
        while let Ok(notification) = events.try_recv() {
            seen.push(notification.event);
        }
        seen
    }

    async fn create(h: &mut Harness, count: usize) -> Vec<OrderId> {
        let mut ids = Vec::new();
        for _ in 0..count {
            ids.push(h.engine.create_order(draft(10, 1)).await.unwrap().id);
        }
        drain(&mut h.events);
        ids
    }

    async fn status_of(h: &Harness, id: OrderId) -> OrderStatus {
        h.engine.get_by_id(id).await.unwrap().status
    }

    #[tokio::test]
    async fn test_success_moves_accepted_to_awaiting_print() {
        let mut h = harness().await;
        let ids = create(&mut h, 1).await;

        let changes = h
            .engine
            .update_statuses(&ids, DRIVER, DeliveryOutcome::Success)
            .await
            .unwrap();

        assert_eq!(changes[0].from, OrderStatus::Accepted);
        assert_eq!(changes[0].to, OrderStatus::AwaitingPrint);

        let view = h.engine.get_by_id(ids[0]).await.unwrap();
        assert_eq!(view.status, OrderStatus::AwaitingPrint);
        assert_eq!(view.updated_by.id, DRIVER);
    }

    #[tokio::test]
    async fn test_delivery_failure_twice_cancels() {
        let mut h = harness().await;
        let ids = create(&mut h, 1).await;

        for _ in 0..3 {
            h.engine
                .update_statuses(&ids, ADMIN, DeliveryOutcome::Success)
                .await
                .unwrap();
        }
        assert_eq!(status_of(&h, ids[0]).await, OrderStatus::OutForDelivery);

        h.engine
            .update_statuses(&ids, ADMIN, DeliveryOutcome::Failure)
            .await
            .unwrap();
        assert_eq!(status_of(&h, ids[0]).await, OrderStatus::DeliveryFailed);

        h.engine
            .update_statuses(&ids, ADMIN, DeliveryOutcome::Failure)
            .await
            .unwrap();
        assert_eq!(status_of(&h, ids[0]).await, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_terminal_orders_are_stamped_but_unchanged() {
        let mut h = harness().await;
        let ids = create(&mut h, 1).await;

        h.engine
            .update_statuses(&ids, ADMIN, DeliveryOutcome::Failure)
            .await
            .unwrap();
        let before = h.engine.get_by_id(ids[0]).await.unwrap();
        assert_eq!(before.status, OrderStatus::Cancelled);

        let changes = h
            .engine
            .update_statuses(&ids, DRIVER, DeliveryOutcome::Success)
            .await
            .unwrap();
        assert!(changes[0].is_noop());

        let after = h.engine.get_by_id(ids[0]).await.unwrap();
        assert_eq!(after.status, OrderStatus::Cancelled);
        assert_eq!(after.updated_by.id, DRIVER);
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn test_create_order_ignores_supplied_status() {
        let mut h = harness().await;
        let mut request = draft(10, 2);
        request.status_id = Some(5);

        let order = h.engine.create_order(request).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Accepted);

        let view = h.engine.get_by_id(order.id).await.unwrap();
        assert_eq!(view.status, OrderStatus::Accepted);
        assert_eq!(view.customer_email, "guest@harbour.example");
        assert_eq!(view.items[0].option.product.name, "Postcard");
        let hotel = view.address.as_ref().and_then(|a| a.hotel.as_ref());
        assert_eq!(hotel.map(|h| h.id), Some(1));

        assert_eq!(
            drain(&mut h.events),
            vec![ChangeEvent::OrderChanged { order_id: order.id }]
        );
    }

    #[tokio::test]
    async fn test_create_order_rejects_invalid_draft() {
        let h = harness().await;

        let mut empty = draft(10, 1);
        empty.items.clear();
        let result = h.engine.create_order(empty).await;
        assert!(matches!(result, Err(OrderError::Validation(_))));

        let mut underpriced = draft(10, 1);
        underpriced.total = Decimal::new(100, 2);
        let result = h.engine.create_order(underpriced).await;
        assert!(matches!(result, Err(OrderError::Validation(_))));

        assert_eq!(h.repository.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_order_decrements_stock_and_flags_low_stock() {
        let mut h = harness().await;

        let order = h.engine.create_order(draft(11, 2)).await.unwrap();

        assert_eq!(h.repository.stock(11).await, Some(4));
        assert_eq!(
            drain(&mut h.events),
            vec![
                ChangeEvent::OrderChanged { order_id: order.id },
                ChangeEvent::LowStock { option_id: 11 },
            ]
        );
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_order() {
        let mut h = harness().await;

        let result = h.engine.create_order(draft(11, 7)).await;

        assert!(matches!(result, Err(OrderError::Validation(_))));
        assert_eq!(h.repository.order_count().await, 0);
        assert_eq!(h.repository.stock(11).await, Some(6));
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_create_order_with_unknown_delivery_type() {
        let h = harness().await;
        let mut request = draft(10, 1);
        request.delivery_type_id = 99;

        let result = h.engine.create_order(request).await;
        assert!(matches!(result, Err(OrderError::ReferenceConstraint(_))));
    }

    #[tokio::test]
    async fn test_create_order_storage_failure_carries_summary() {
        let h = harness().await;
        h.repository.fail_next_saves(1).await;

        let err = h.engine.create_order(draft(10, 1)).await.unwrap_err();

        assert_eq!(err.kind(), "persistence");
        assert!(err.to_string().starts_with("Failed to save order: "));
    }

    #[tokio::test]
    async fn test_record_recipient_links_one_row_to_all_orders() {
        let mut h = harness().await;
        let ids = create(&mut h, 2).await;

        let recipient_id = h
            .engine
            .record_recipient(
                &ids,
                NewRecipient {
                    name: "Front desk".to_string(),
                    signature: vec![1, 2, 3],
                    received_at: Some(Utc::now() - chrono::Duration::days(3)),
                },
                DRIVER,
            )
            .await
            .unwrap();

        assert_eq!(h.repository.recipient_count().await, 1);

        for id in &ids {
            let view = h.engine.get_by_id(*id).await.unwrap();
            let recipient = view.recipient.unwrap();
            assert_eq!(recipient.id, recipient_id);
            // Server time, not the client-supplied one
            assert!(Utc::now() - recipient.received_at < chrono::Duration::minutes(1));
        }

        assert_eq!(
            drain(&mut h.events),
            vec![ChangeEvent::OrdersChanged { order_ids: ids }]
        );
    }

    #[tokio::test]
    async fn test_failed_recipient_link_leaves_no_recipient_row() {
        let mut h = harness().await;
        let ids = create(&mut h, 2).await;

        let result = h
            .engine
            .record_recipient(
                &ids,
                NewRecipient {
                    name: "Front desk".to_string(),
                    signature: vec![4, 5, 6],
                    received_at: None,
                },
                77,
            )
            .await;

        assert!(matches!(result, Err(OrderError::ReferenceConstraint(_))));
        assert_eq!(h.repository.recipient_count().await, 0);
        for id in &ids {
            assert!(h.engine.get_by_id(*id).await.unwrap().recipient.is_none());
        }
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_zero_matches_is_not_found_without_notification() {
        let mut h = harness().await;
        create(&mut h, 1).await;

        let result = h
            .engine
            .update_statuses(&[404, 405], ADMIN, DeliveryOutcome::Success)
            .await;

        assert!(matches!(result, Err(OrderError::NotFound(_))));
        assert!(drain(&mut h.events).is_empty());

        let result = h
            .engine
            .record_recipient(
                &[404],
                NewRecipient {
                    name: "Nobody".to_string(),
                    signature: vec![],
                    received_at: None,
                },
                ADMIN,
            )
            .await;
        assert!(matches!(result, Err(OrderError::NotFound(_))));
        assert_eq!(h.repository.recipient_count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_id_set_is_validation_error() {
        let h = harness().await;

        let result = h
            .engine
            .update_statuses(&[], ADMIN, DeliveryOutcome::Success)
            .await;
        assert!(matches!(result, Err(OrderError::Validation(_))));
    }

    #[tokio::test]
    async fn test_partial_matches_are_accepted() {
        let mut h = harness().await;
        let ids = create(&mut h, 1).await;

        let changes = h
            .engine
            .update_statuses(&[ids[0], 999], ADMIN, DeliveryOutcome::Success)
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(
            drain(&mut h.events),
            vec![ChangeEvent::OrdersChanged { order_ids: ids }]
        );
    }

    #[tokio::test]
    async fn test_failed_batch_save_changes_nothing() {
        let mut h = harness().await;
        let ids = create(&mut h, 3).await;
        h.repository.fail_next_saves(1).await;

        let result = h
            .engine
            .update_statuses(&ids, ADMIN, DeliveryOutcome::Success)
            .await;

        assert!(matches!(result, Err(OrderError::Persistence { .. })));
        for id in &ids {
            assert_eq!(status_of(&h, *id).await, OrderStatus::Accepted);
        }
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_assign_deliveryman() {
        let mut h = harness().await;
        let ids = create(&mut h, 2).await;

        let assigned = h.engine.assign_deliveryman(&ids, DRIVER, ADMIN).await.unwrap();
        assert_eq!(assigned, ids);

        let view = h.engine.get_by_id(ids[1]).await.unwrap();
        assert_eq!(view.deliveryman.map(|d| d.name), Some("Driver".to_string()));
        assert_eq!(
            drain(&mut h.events),
            vec![ChangeEvent::OrdersChanged { order_ids: ids }]
        );
    }

    #[tokio::test]
    async fn test_assign_unknown_deliveryman_is_reference_constraint() {
        let mut h = harness().await;
        let ids = create(&mut h, 1).await;

        let result = h.engine.assign_deliveryman(&ids, 77, ADMIN).await;

        assert!(matches!(result, Err(OrderError::ReferenceConstraint(_))));
        let view = h.engine.get_by_id(ids[0]).await.unwrap();
        assert!(view.deliveryman.is_none());
    }

    #[tokio::test]
    async fn test_slow_save_times_out_without_state_change() {
        let mut h = harness_with(LifecycleConfig {
            persistence_timeout_ms: 20,
            ..LifecycleConfig::default()
        })
        .await;
        let ids = create(&mut h, 1).await;
        h.repository.set_write_latency(Duration::from_millis(200)).await;

        let result = h
            .engine
            .update_statuses(&ids, ADMIN, DeliveryOutcome::Success)
            .await;

        assert!(matches!(
            result,
            Err(OrderError::Timeout { operation: "save_orders", .. })
        ));
        assert_eq!(status_of(&h, ids[0]).await, OrderStatus::Accepted);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates_from_same_read_conflict() {
        let mut h = harness().await;
        let ids = create(&mut h, 1).await;
        h.repository.set_write_latency(Duration::from_millis(50)).await;

        // Both load Accepted before either write lands
        let (first, second) = tokio::join!(
            h.engine.update_statuses(&ids, ADMIN, DeliveryOutcome::Success),
            h.engine.update_statuses(&ids, DRIVER, DeliveryOutcome::Success),
        );

        let results = [first, second];
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let conflicted = results
            .iter()
            .filter(|r| matches!(r, Err(OrderError::Conflict(_))))
            .count();
        assert_eq!((succeeded, conflicted), (1, 1));
        assert_eq!(status_of(&h, ids[0]).await, OrderStatus::AwaitingPrint);
        assert_eq!(drain(&mut h.events).len(), 1);

        // Retrying after the conflict applies the second step
        h.engine
            .update_statuses(&ids, DRIVER, DeliveryOutcome::Success)
            .await
            .unwrap();
        assert_eq!(status_of(&h, ids[0]).await, OrderStatus::Printed);
    }

    #[tokio::test]
    async fn test_get_all_decrypts_newest_first() {
        let mut h = harness().await;
        let ids = create(&mut h, 2).await;

        let views = h.engine.get_all().await.unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].id, ids[1]);
        assert!(views.iter().all(|v| v.customer_email == "guest@harbour.example"));
    }

    #[tokio::test]
    async fn test_get_by_id_not_found() {
        let h = harness().await;
        let result = h.engine.get_by_id(1).await;
        assert!(matches!(result, Err(OrderError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_notifications_for_one_order_keep_raise_order() {
        let mut h = harness().await;
        let ids = create(&mut h, 1).await;

        h.engine
            .update_statuses(&ids, ADMIN, DeliveryOutcome::Success)
            .await
            .unwrap();
        h.engine.assign_deliveryman(&ids, DRIVER, ADMIN).await.unwrap();
        h.engine
            .update_statuses(&ids, ADMIN, DeliveryOutcome::Failure)
            .await
            .unwrap();

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.concerns_order(ids[0])));
    }
}
