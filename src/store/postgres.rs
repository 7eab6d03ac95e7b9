use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::config::DatabaseConfig;
use crate::domain::order::{
    AddressRef, DeliveryTypeRef, HotelRef, NewOrder, OptionId, OptionRef, Order, OrderId,
    OrderItem, OrderItemDetails, OrderRecipient, OrderRecord, OrderRow, OrderStatus, ProductRef,
    RecipientId, UnsavedRecipient, UserRef,
};
use super::{InsertedOrder, OrderFilter, OrderRepository, StoreError};

// ============================================================================
// PostgreSQL Order Repository
// ============================================================================
//
// Every write runs inside one `sqlx` transaction. If the future is dropped
// before `commit()` (e.g. the engine's deadline fires) the transaction is
// rolled back when it goes out of scope.
//
// Order updates match on the loaded status and `updated_at` as well as the
// id. Zero affected rows means the order is gone (`NotFound`) or another
// writer got there first (`Conflict`); either way the batch rolls back.
//
// ============================================================================

/// SQLSTATE for foreign_key_violation
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema in `migrations/`
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {}", e)))?;

        tracing::info!("Database schema is up to date");
        Ok(())
    }

    async fn load_items(
        &self,
        order_ids: &[OrderId],
    ) -> Result<HashMap<OrderId, Vec<OrderItem>>, StoreError> {
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, option_id, quantity, image_url
             FROM order_items
             WHERE order_id = ANY($1)
             ORDER BY id",
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item);
        }
        Ok(by_order)
    }

    async fn load_item_details(
        &self,
        order_ids: &[OrderId],
    ) -> Result<HashMap<OrderId, Vec<OrderItemDetails>>, StoreError> {
        let rows = sqlx::query(
            "SELECT oi.id, oi.order_id, oi.quantity, oi.image_url,
                    op.id AS option_id, op.name AS option_name,
                    p.id AS product_id, p.name AS product_name
             FROM order_items oi
             JOIN options op ON op.id = oi.option_id
             JOIN products p ON p.id = op.product_id
             WHERE oi.order_id = ANY($1)
             ORDER BY oi.id",
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<OrderId, Vec<OrderItemDetails>> = HashMap::new();
        for row in rows {
            let order_id: OrderId = row.try_get("order_id")?;
            let item = OrderItemDetails {
                id: row.try_get("id")?,
                quantity: row.try_get("quantity")?,
                image_url: row.try_get("image_url")?,
                option: OptionRef {
                    id: row.try_get("option_id")?,
                    name: row.try_get("option_name")?,
                    product: ProductRef {
                        id: row.try_get("product_id")?,
                        name: row.try_get("product_name")?,
                    },
                },
            };
            by_order.entry(order_id).or_default().push(item);
        }
        Ok(by_order)
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn load_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT id, created_at, updated_at, subtotal, total, reference_number, request,
                    encrypted_email, delivery_type_id, address_id, status_id,
                    delivery_man_id, recipient_id, updated_by_id
             FROM orders
             WHERE ($1::int4[] IS NULL OR id = ANY($1))
             ORDER BY id",
        )
        .bind(filter.as_id_list())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<OrderId> = rows.iter().map(|row| row.id).collect();
        let mut items = self.load_items(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                let id = row.id;
                Order::from_row(row, order_items)
                    .map_err(|e| StoreError::Corrupt(format!("order {}: {}", id, e)))
            })
            .collect()
    }

    async fn load_order_records(
        &self,
        filter: &OrderFilter,
    ) -> Result<Vec<OrderRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT o.id, o.created_at, o.updated_at, o.subtotal, o.total,
                    o.reference_number, o.request, o.encrypted_email, o.status_id,
                    dt.id AS delivery_type_id, dt.name AS delivery_type_name,
                    a.id AS address_id, a.line AS address_line,
                    h.id AS hotel_id, h.name AS hotel_name,
                    dm.id AS deliveryman_id, dm.name AS deliveryman_name,
                    dm.email AS deliveryman_email,
                    r.id AS recipient_id, r.name AS recipient_name,
                    r.signature AS recipient_signature,
                    r.received_at AS recipient_received_at,
                    ub.id AS updated_by_id, ub.name AS updated_by_name,
                    ub.email AS updated_by_email
             FROM orders o
             JOIN delivery_types dt ON dt.id = o.delivery_type_id
             JOIN users ub ON ub.id = o.updated_by_id
             LEFT JOIN addresses a ON a.id = o.address_id
             LEFT JOIN hotels h ON h.id = a.hotel_id
             LEFT JOIN users dm ON dm.id = o.delivery_man_id
             LEFT JOIN order_recipients r ON r.id = o.recipient_id
             WHERE ($1::int4[] IS NULL OR o.id = ANY($1))
             ORDER BY o.created_at DESC, o.id DESC",
        )
        .bind(filter.as_id_list())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(row.try_get::<OrderId, _>("id")?);
        }
        let mut items = self.load_item_details(&ids).await?;

        rows.iter()
            .map(|row| {
                let id: OrderId = row.try_get("id")?;
                record_from_row(row, items.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn save_orders(&self, batch: &[Order]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for order in batch {
            // An early return drops `tx`, which rolls back the orders already updated
            update_order(&mut tx, order, order.recipient_id).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(order_count = batch.len(), "Committed order batch");
        Ok(())
    }

    async fn save_recipient(
        &self,
        recipient: &UnsavedRecipient,
    ) -> Result<OrderRecipient, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let saved = insert_recipient(&mut tx, recipient).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(saved)
    }

    async fn save_recipient_for_orders(
        &self,
        recipient: &UnsavedRecipient,
        batch: &[Order],
    ) -> Result<OrderRecipient, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let saved = insert_recipient(&mut tx, recipient).await?;

        for order in batch {
            update_order(&mut tx, order, Some(saved.id)).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(
            recipient_id = saved.id,
            order_count = batch.len(),
            "Committed recipient with its orders"
        );
        Ok(saved)
    }

    async fn insert_order(
        &self,
        order: NewOrder,
        low_stock_threshold: i32,
    ) -> Result<InsertedOrder, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let order_id: OrderId = sqlx::query_scalar(
            "INSERT INTO orders (
                created_at, updated_at, subtotal, total, reference_number, request,
                encrypted_email, delivery_type_id, address_id, status_id, updated_by_id
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING id",
        )
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.subtotal)
        .bind(order.total)
        .bind(&order.reference_number)
        .bind(&order.request)
        .bind(&order.encrypted_email)
        .bind(order.delivery_type_id)
        .bind(order.address_id)
        .bind(order.status().code())
        .bind(order.updated_by_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let mut item_ids = Vec::with_capacity(order.items.len());
        let mut low_stock: Vec<OptionId> = Vec::new();

        for item in &order.items {
            let remaining: Option<i32> = sqlx::query_scalar(
                "UPDATE options SET stock = stock - $1 WHERE id = $2 RETURNING stock",
            )
            .bind(item.quantity)
            .bind(item.option_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            let remaining = remaining.ok_or_else(|| {
                StoreError::ReferenceConstraint(format!(
                    "option {} does not exist",
                    item.option_id
                ))
            })?;

            if remaining < 0 {
                return Err(StoreError::InsufficientStock {
                    option_id: item.option_id,
                    requested: item.quantity,
                    available: remaining + item.quantity,
                });
            }

            if remaining <= low_stock_threshold && !low_stock.contains(&item.option_id) {
                low_stock.push(item.option_id);
            }

            let item_id: i32 = sqlx::query_scalar(
                "INSERT INTO order_items (order_id, option_id, quantity, image_url)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id",
            )
            .bind(order_id)
            .bind(item.option_id)
            .bind(item.quantity)
            .bind(&item.image_url)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            item_ids.push(item_id);
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(
            order_id = order_id,
            item_count = item_ids.len(),
            "Inserted order with items"
        );

        Ok(InsertedOrder {
            order: order.persisted(order_id, &item_ids),
            low_stock,
        })
    }
}

async fn insert_recipient(
    tx: &mut Transaction<'_, Postgres>,
    recipient: &UnsavedRecipient,
) -> Result<OrderRecipient, StoreError> {
    let id: RecipientId = sqlx::query_scalar(
        "INSERT INTO order_recipients (name, signature, received_at)
         VALUES ($1, $2, $3)
         RETURNING id",
    )
    .bind(&recipient.name)
    .bind(&recipient.signature)
    .bind(recipient.received_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(recipient.clone().persisted(id))
}

/// Conditional update of one order; the caller owns commit and rollback
async fn update_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
    recipient_id: Option<RecipientId>,
) -> Result<(), StoreError> {
    let expected = order.loaded_version();

    let result = sqlx::query(
        "UPDATE orders
         SET status_id = $2, delivery_man_id = $3, recipient_id = $4,
             updated_at = $5, updated_by_id = $6
         WHERE id = $1 AND status_id = $7 AND updated_at = $8",
    )
    .bind(order.id)
    .bind(order.status().code())
    .bind(order.delivery_man_id)
    .bind(recipient_id)
    .bind(order.updated_at)
    .bind(order.updated_by_id)
    .bind(expected.status.code())
    .bind(expected.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
        .bind(order.id)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

    if exists {
        tracing::warn!(
            order_id = order.id,
            expected_status = %expected.status,
            "Order changed since it was loaded"
        );
        Err(StoreError::Conflict(format!("Order {}", order.id)))
    } else {
        Err(StoreError::NotFound(format!("Order {}", order.id)))
    }
}

fn record_from_row(
    row: &PgRow,
    items: Vec<OrderItemDetails>,
) -> Result<OrderRecord, StoreError> {
    let id: OrderId = row.try_get("id")?;
    let status_id: i32 = row.try_get("status_id")?;
    let status = OrderStatus::try_from(status_id)
        .map_err(|e| StoreError::Corrupt(format!("order {}: {}", id, e)))?;

    let address = match row.try_get::<Option<i32>, _>("address_id")? {
        Some(address_id) => {
            let hotel = match row.try_get::<Option<i32>, _>("hotel_id")? {
                Some(hotel_id) => Some(HotelRef {
                    id: hotel_id,
                    name: row.try_get("hotel_name")?,
                }),
                None => None,
            };
            Some(AddressRef {
                id: address_id,
                line: row.try_get("address_line")?,
                hotel,
            })
        }
        None => None,
    };

    let deliveryman = match row.try_get::<Option<i32>, _>("deliveryman_id")? {
        Some(user_id) => Some(UserRef {
            id: user_id,
            name: row.try_get("deliveryman_name")?,
            email: row.try_get("deliveryman_email")?,
        }),
        None => None,
    };

    let recipient = match row.try_get::<Option<i32>, _>("recipient_id")? {
        Some(recipient_id) => Some(OrderRecipient {
            id: recipient_id,
            name: row.try_get("recipient_name")?,
            signature: row.try_get("recipient_signature")?,
            received_at: row.try_get("recipient_received_at")?,
        }),
        None => None,
    };

    Ok(OrderRecord {
        id,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        subtotal: row.try_get("subtotal")?,
        total: row.try_get("total")?,
        reference_number: row.try_get("reference_number")?,
        request: row.try_get("request")?,
        customer_email: row.try_get("encrypted_email")?,
        status,
        delivery_type: DeliveryTypeRef {
            id: row.try_get("delivery_type_id")?,
            name: row.try_get("delivery_type_name")?,
        },
        address,
        deliveryman,
        recipient,
        updated_by: UserRef {
            id: row.try_get("updated_by_id")?,
            name: row.try_get("updated_by_name")?,
            email: row.try_get("updated_by_email")?,
        },
        items,
    })
}

fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
            let detail = db_error
                .constraint()
                .map(str::to_string)
                .unwrap_or_else(|| db_error.message().to_string());

            tracing::warn!(
                constraint = %detail,
                "Write blocked by foreign key constraint"
            );
            return StoreError::ReferenceConstraint(detail);
        }
    }

    tracing::error!(error = %error, "Database operation failed");
    StoreError::Sqlx(error)
}
