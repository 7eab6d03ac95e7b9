// ============================================================================
// Order Store - persistence boundary for the lifecycle engine
// ============================================================================
//
// Two read shapes:
// - `load_orders`         -> `Order` aggregates (order row + items), used by
//                            the mutation paths
// - `load_order_records`  -> `OrderRecord` projections with every related
//                            entity joined, used by the display paths
//
// Writes are transactional: a batch either commits entirely or not at all.
// Foreign-key violations are reported as `StoreError::ReferenceConstraint`
// so callers can tell them apart from generic failures. Order updates are
// conditional on the version the order was loaded at; a row changed in the
// meantime fails the whole batch with `StoreError::Conflict`.
//
// ============================================================================

mod memory;
mod postgres;

use async_trait::async_trait;

use crate::domain::order::{
    NewOrder, OptionId, Order, OrderId, OrderRecipient, OrderRecord, UnsavedRecipient,
};

pub use memory::InMemoryOrderRepository;
pub use postgres::PgOrderRepository;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Foreign key violation: {0}")]
    ReferenceConstraint(String),

    #[error("{0} was modified concurrently")]
    Conflict(String),

    #[error("Option {option_id} has {available} in stock, {requested} requested")]
    InsufficientStock {
        option_id: OptionId,
        requested: i32,
        available: i32,
    },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Which orders a load should return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderFilter {
    All,
    Ids(Vec<OrderId>),
}

impl OrderFilter {
    pub fn ids(ids: impl IntoIterator<Item = OrderId>) -> Self {
        let mut ids: Vec<OrderId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        OrderFilter::Ids(ids)
    }

    pub fn single(id: OrderId) -> Self {
        OrderFilter::Ids(vec![id])
    }

    pub fn matches(&self, id: OrderId) -> bool {
        match self {
            OrderFilter::All => true,
            OrderFilter::Ids(ids) => ids.contains(&id),
        }
    }

    /// `None` means "no restriction", which the SQL layer binds as NULL
    pub fn as_id_list(&self) -> Option<Vec<OrderId>> {
        match self {
            OrderFilter::All => None,
            OrderFilter::Ids(ids) => Some(ids.clone()),
        }
    }
}

/// Result of inserting a new order
#[derive(Debug, Clone)]
pub struct InsertedOrder {
    pub order: Order,
    /// Options whose stock fell to or below the threshold in this insert
    pub low_stock: Vec<OptionId>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn load_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    async fn load_order_records(
        &self,
        filter: &OrderFilter,
    ) -> Result<Vec<OrderRecord>, StoreError>;

    /// Persist every order of the batch in one transaction
    async fn save_orders(&self, batch: &[Order]) -> Result<(), StoreError>;

    async fn save_recipient(
        &self,
        recipient: &UnsavedRecipient,
    ) -> Result<OrderRecipient, StoreError>;

    /// Insert the recipient and point every order of the batch at it, in one
    /// transaction. The orders carry their audit stamp already.
    async fn save_recipient_for_orders(
        &self,
        recipient: &UnsavedRecipient,
        batch: &[Order],
    ) -> Result<OrderRecipient, StoreError>;

    /// Insert the order with its items and decrement option stock, atomically
    async fn insert_order(
        &self,
        order: NewOrder,
        low_stock_threshold: i32,
    ) -> Result<InsertedOrder, StoreError>;
}
