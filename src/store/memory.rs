use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::order::{
    AddressRef, DeliveryTypeRef, HotelRef, NewOrder, OptionId, OptionRef, Order, OrderId,
    OrderItemDetails, OrderRecipient, OrderRecord, ProductRef, RecipientId, UnsavedRecipient,
    UserId, UserRef,
};
use super::{InsertedOrder, OrderFilter, OrderRepository, StoreError};

// ============================================================================
// In-Memory Order Repository
// ============================================================================
//
// Same contract as the PostgreSQL repository: every write validates the whole
// batch (existence, loaded version and foreign keys) before touching state,
// so a failing batch leaves nothing behind. Used by tests, with hooks for injecting save
// failures and latency.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryOrderRepository {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    orders: BTreeMap<OrderId, Order>,
    recipients: BTreeMap<RecipientId, OrderRecipient>,
    delivery_types: HashMap<i32, DeliveryTypeRef>,
    hotels: HashMap<i32, HotelRef>,
    addresses: HashMap<i32, (String, Option<i32>)>,
    users: HashMap<UserId, UserRef>,
    products: HashMap<i32, ProductRef>,
    options: HashMap<OptionId, StockedOption>,
    next_order_id: OrderId,
    next_item_id: i32,
    next_recipient_id: RecipientId,
    failing_saves: u32,
    write_latency: Option<Duration>,
}

struct StockedOption {
    product_id: i32,
    name: String,
    stock: i32,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Reference data
    // ------------------------------------------------------------------------

    pub async fn add_delivery_type(&self, id: i32, name: &str) {
        let mut state = self.state.lock().await;
        state.delivery_types.insert(id, DeliveryTypeRef { id, name: name.to_string() });
    }

    pub async fn add_hotel(&self, id: i32, name: &str) {
        let mut state = self.state.lock().await;
        state.hotels.insert(id, HotelRef { id, name: name.to_string() });
    }

    pub async fn add_address(&self, id: i32, line: &str, hotel_id: Option<i32>) {
        let mut state = self.state.lock().await;
        state.addresses.insert(id, (line.to_string(), hotel_id));
    }

    pub async fn add_user(&self, id: UserId, name: &str, email: &str) {
        let mut state = self.state.lock().await;
        state.users.insert(
            id,
            UserRef {
                id,
                name: name.to_string(),
                email: email.to_string(),
            },
        );
    }

    pub async fn add_product(&self, id: i32, name: &str) {
        let mut state = self.state.lock().await;
        state.products.insert(id, ProductRef { id, name: name.to_string() });
    }

    pub async fn add_option(&self, id: OptionId, product_id: i32, name: &str, stock: i32) {
        let mut state = self.state.lock().await;
        state.options.insert(
            id,
            StockedOption {
                product_id,
                name: name.to_string(),
                stock,
            },
        );
    }

    // ------------------------------------------------------------------------
    // Test hooks
    // ------------------------------------------------------------------------

    /// Make the next `count` writes fail with a database error
    pub async fn fail_next_saves(&self, count: u32) {
        self.state.lock().await.failing_saves = count;
    }

    /// Delay every write by `latency` before it applies
    pub async fn set_write_latency(&self, latency: Duration) {
        self.state.lock().await.write_latency = Some(latency);
    }

    pub async fn stock(&self, option_id: OptionId) -> Option<i32> {
        self.state.lock().await.options.get(&option_id).map(|o| o.stock)
    }

    pub async fn recipient_count(&self) -> usize {
        self.state.lock().await.recipients.len()
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let latency = self.state.lock().await.write_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if state.failing_saves > 0 {
            state.failing_saves -= 1;
            return Err(StoreError::Database("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl MemoryState {
    /// Checks one order of a batch against what is stored
    fn check_update(&self, order: &Order) -> Result<(), StoreError> {
        let stored = self
            .orders
            .get(&order.id)
            .ok_or_else(|| StoreError::NotFound(format!("Order {}", order.id)))?;

        if stored.version() != order.loaded_version() {
            return Err(StoreError::Conflict(format!("Order {}", order.id)));
        }

        self.require_user(order.updated_by_id, "user")?;
        if let Some(deliveryman) = order.delivery_man_id {
            self.require_user(deliveryman, "deliveryman")?;
        }
        Ok(())
    }

    fn apply_update(&mut self, order: &Order) {
        let mut saved = order.clone();
        saved.mark_saved();
        self.orders.insert(saved.id, saved);
    }

    fn require_user(&self, id: UserId, role: &str) -> Result<(), StoreError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::ReferenceConstraint(format!("{} {} does not exist", role, id)))
        }
    }

    fn record(&self, order: &Order) -> Result<OrderRecord, StoreError> {
        let missing = |what: String| StoreError::Corrupt(format!("order {}: {}", order.id, what));

        let delivery_type = self
            .delivery_types
            .get(&order.delivery_type_id)
            .cloned()
            .ok_or_else(|| missing(format!("delivery type {}", order.delivery_type_id)))?;

        let address = order.address_id.and_then(|address_id| {
            self.addresses.get(&address_id).map(|(line, hotel_id)| AddressRef {
                id: address_id,
                line: line.clone(),
                hotel: hotel_id.and_then(|h| self.hotels.get(&h).cloned()),
            })
        });

        let updated_by = self
            .users
            .get(&order.updated_by_id)
            .cloned()
            .ok_or_else(|| missing(format!("user {}", order.updated_by_id)))?;

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let option = self
                .options
                .get(&item.option_id)
                .ok_or_else(|| missing(format!("option {}", item.option_id)))?;
            let product = self
                .products
                .get(&option.product_id)
                .cloned()
                .ok_or_else(|| missing(format!("product {}", option.product_id)))?;

            items.push(OrderItemDetails {
                id: item.id,
                quantity: item.quantity,
                image_url: item.image_url.clone(),
                option: OptionRef {
                    id: item.option_id,
                    name: option.name.clone(),
                    product,
                },
            });
        }

        Ok(OrderRecord {
            id: order.id,
            created_at: order.created_at,
            updated_at: order.updated_at,
            subtotal: order.subtotal,
            total: order.total,
            reference_number: order.reference_number.clone(),
            request: order.request.clone(),
            customer_email: order.encrypted_email.clone(),
            status: order.status(),
            delivery_type,
            address,
            deliveryman: order.delivery_man_id.and_then(|id| self.users.get(&id).cloned()),
            recipient: order.recipient_id.and_then(|id| self.recipients.get(&id).cloned()),
            updated_by,
            items,
        })
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn load_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|order| filter.matches(order.id))
            .cloned()
            .collect())
    }

    async fn load_order_records(
        &self,
        filter: &OrderFilter,
    ) -> Result<Vec<OrderRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut records = state
            .orders
            .values()
            .filter(|order| filter.matches(order.id))
            .map(|order| state.record(order))
            .collect::<Result<Vec<_>, _>>()?;

        // Newest first, like the SQL projection
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn save_orders(&self, batch: &[Order]) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut state = self.state.lock().await;

        for order in batch {
            state.check_update(order)?;
            if let Some(recipient) = order.recipient_id {
                if !state.recipients.contains_key(&recipient) {
                    return Err(StoreError::ReferenceConstraint(format!(
                        "recipient {} does not exist",
                        recipient
                    )));
                }
            }
        }

        for order in batch {
            state.apply_update(order);
        }
        Ok(())
    }

    async fn save_recipient(
        &self,
        recipient: &UnsavedRecipient,
    ) -> Result<OrderRecipient, StoreError> {
        self.before_write().await?;
        let mut state = self.state.lock().await;

        state.next_recipient_id += 1;
        let saved = recipient.clone().persisted(state.next_recipient_id);
        state.recipients.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn save_recipient_for_orders(
        &self,
        recipient: &UnsavedRecipient,
        batch: &[Order],
    ) -> Result<OrderRecipient, StoreError> {
        self.before_write().await?;
        let mut state = self.state.lock().await;

        for order in batch {
            state.check_update(order)?;
        }

        state.next_recipient_id += 1;
        let saved = recipient.clone().persisted(state.next_recipient_id);
        state.recipients.insert(saved.id, saved.clone());

        for order in batch {
            let mut linked = order.clone();
            linked.attach_recipient(saved.id, order.updated_by_id, order.updated_at);
            state.apply_update(&linked);
        }
        Ok(saved)
    }

    async fn insert_order(
        &self,
        order: NewOrder,
        low_stock_threshold: i32,
    ) -> Result<InsertedOrder, StoreError> {
        self.before_write().await?;
        let mut state = self.state.lock().await;

        if !state.delivery_types.contains_key(&order.delivery_type_id) {
            return Err(StoreError::ReferenceConstraint(format!(
                "delivery type {} does not exist",
                order.delivery_type_id
            )));
        }
        if let Some(address_id) = order.address_id {
            if !state.addresses.contains_key(&address_id) {
                return Err(StoreError::ReferenceConstraint(format!(
                    "address {} does not exist",
                    address_id
                )));
            }
        }
        state.require_user(order.updated_by_id, "user")?;
        if state.orders.values().any(|o| o.reference_number == order.reference_number) {
            return Err(StoreError::Database(format!(
                "duplicate reference number {}",
                order.reference_number
            )));
        }

        let mut requested: BTreeMap<OptionId, i32> = BTreeMap::new();
        for item in &order.items {
            *requested.entry(item.option_id).or_default() += item.quantity;
        }
        for (option_id, quantity) in &requested {
            let option = state.options.get(option_id).ok_or_else(|| {
                StoreError::ReferenceConstraint(format!("option {} does not exist", option_id))
            })?;
            if option.stock < *quantity {
                return Err(StoreError::InsufficientStock {
                    option_id: *option_id,
                    requested: *quantity,
                    available: option.stock,
                });
            }
        }

        let mut low_stock = Vec::new();
        for (option_id, quantity) in requested {
            if let Some(option) = state.options.get_mut(&option_id) {
                option.stock -= quantity;
                if option.stock <= low_stock_threshold {
                    low_stock.push(option_id);
                }
            }
        }

        state.next_order_id += 1;
        let order_id = state.next_order_id;
        let mut item_ids = Vec::with_capacity(order.items.len());
        for _ in &order.items {
            state.next_item_id += 1;
            item_ids.push(state.next_item_id);
        }

        let persisted = order.persisted(order_id, &item_ids);
        state.orders.insert(order_id, persisted.clone());

        Ok(InsertedOrder {
            order: persisted,
            low_stock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::order::{DeliveryOutcome, NewOrderItem, OrderStatus};

    async fn seeded() -> InMemoryOrderRepository {
        let repo = InMemoryOrderRepository::new();
        repo.add_delivery_type(1, "Pickup").await;
        repo.add_user(1, "Admin", "admin@shop.example").await;
        repo.add_product(1, "Mug").await;
        repo.add_option(5, 1, "Blue", 3).await;
        repo
    }

    fn new_order(reference: &str, quantity: i32) -> NewOrder {
        let now = Utc::now();
        NewOrder {
            created_at: now,
            updated_at: now,
            subtotal: Decimal::ONE,
            total: Decimal::ONE,
            reference_number: reference.to_string(),
            request: None,
            encrypted_email: vec![0; 32],
            delivery_type_id: 1,
            address_id: None,
            updated_by_id: 1,
            items: vec![NewOrderItem {
                option_id: 5,
                quantity,
                image_url: String::new(),
            }],
        }
    }

    #[tokio::test]
    async fn test_batch_with_unknown_order_writes_nothing() {
        let repo = seeded().await;
        let inserted = repo.insert_order(new_order("R-1", 1), 0).await.unwrap();

        let mut known = inserted.order.clone();
        known.assign_deliveryman(1, 1, Utc::now());
        let mut unknown = inserted.order.clone();
        unknown.id = 99;

        let result = repo.save_orders(&[known, unknown]).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        let stored = repo.load_orders(&OrderFilter::All).await.unwrap();
        assert_eq!(stored[0].delivery_man_id, None);
    }

    #[tokio::test]
    async fn test_save_from_stale_read_conflicts() {
        let repo = seeded().await;
        repo.insert_order(new_order("R-1", 1), 0).await.unwrap();

        let first = repo.load_orders(&OrderFilter::All).await.unwrap();
        let second = first.clone();

        let mut winner = first[0].clone();
        winner.apply_outcome(DeliveryOutcome::Success, 1, Utc::now());
        repo.save_orders(&[winner]).await.unwrap();

        let mut stale = second[0].clone();
        stale.assign_deliveryman(1, 1, Utc::now());
        let result = repo.save_orders(&[stale]).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let stored = repo.load_orders(&OrderFilter::All).await.unwrap();
        assert_eq!(stored[0].status(), OrderStatus::AwaitingPrint);
        assert_eq!(stored[0].delivery_man_id, None);

        // A fresh read carries the new version and saves cleanly
        let mut fresh = stored[0].clone();
        fresh.assign_deliveryman(1, 1, Utc::now());
        repo.save_orders(&[fresh]).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_recipient_assigns_ids() {
        let repo = seeded().await;
        let recipient = UnsavedRecipient {
            name: "Concierge".to_string(),
            signature: vec![],
            received_at: Utc::now(),
        };

        let first = repo.save_recipient(&recipient).await.unwrap();
        let second = repo.save_recipient(&recipient).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.name, "Concierge");
        assert_eq!(repo.recipient_count().await, 2);
    }

    #[tokio::test]
    async fn test_recipient_for_orders_is_all_or_nothing() {
        let repo = seeded().await;
        let inserted = repo.insert_order(new_order("R-1", 1), 0).await.unwrap();
        let recipient = UnsavedRecipient {
            name: "Front desk".to_string(),
            signature: vec![7; 4],
            received_at: Utc::now(),
        };

        let mut unknown_user = inserted.order.clone();
        unknown_user.stamp(404, Utc::now());
        let result = repo.save_recipient_for_orders(&recipient, &[unknown_user]).await;
        assert!(matches!(result, Err(StoreError::ReferenceConstraint(_))));
        assert_eq!(repo.recipient_count().await, 0);

        let mut order = inserted.order.clone();
        order.stamp(1, Utc::now());
        let saved = repo.save_recipient_for_orders(&recipient, &[order]).await.unwrap();

        let stored = repo.load_orders(&OrderFilter::All).await.unwrap();
        assert_eq!(stored[0].recipient_id, Some(saved.id));
        assert_eq!(repo.recipient_count().await, 1);
    }

    #[tokio::test]
    async fn test_insert_checks_stock_and_reference() {
        let repo = seeded().await;

        let result = repo.insert_order(new_order("R-1", 4), 0).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientStock { available: 3, .. })
        ));

        let inserted = repo.insert_order(new_order("R-1", 2), 1).await.unwrap();
        assert_eq!(inserted.low_stock, vec![5]);
        assert_eq!(repo.stock(5).await, Some(1));

        let duplicate = repo.insert_order(new_order("R-1", 1), 0).await;
        assert!(matches!(duplicate, Err(StoreError::Database(_))));
        assert_eq!(repo.order_count().await, 1);
    }
}
