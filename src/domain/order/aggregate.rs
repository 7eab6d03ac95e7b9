use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::FieldCipher;
use super::commands::{NewRecipient, OrderDraft};
use super::errors::OrderError;
use super::value_objects::{
    DeliveryOutcome, OptionId, OrderId, OrderStatus, RecipientId, UnknownStatusCode, UserId,
};

// ============================================================================
// Order Aggregate - mutable order state owned by the lifecycle engine
// ============================================================================
//
// Key rules:
// 1. The status is private; it only moves through `apply_outcome`, which
//    consults the transition table. There is no status setter.
// 2. Every mutation stamps `updated_at` and `updated_by_id`.
// 3. New orders are always created as Accepted.
// 4. An order remembers the version it was read at; writes are conditional
//    on the stored row still being at that version.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub reference_number: String,
    pub request: Option<String>,
    pub encrypted_email: Vec<u8>,
    pub delivery_type_id: i32,
    pub address_id: Option<i32>,
    status: OrderStatus,
    pub delivery_man_id: Option<UserId>,
    pub recipient_id: Option<RecipientId>,
    pub updated_by_id: UserId,
    pub items: Vec<OrderItem>,
    #[serde(skip)]
    loaded: OrderVersion,
}

/// Stored status and last update time an order was read at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderVersion {
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: i32,
    pub order_id: OrderId,
    pub option_id: OptionId,
    pub quantity: i32,
    pub image_url: String,
}

/// Flat `orders` row as stored; the status is still a raw code here.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: OrderId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub reference_number: String,
    pub request: Option<String>,
    pub encrypted_email: Vec<u8>,
    pub delivery_type_id: i32,
    pub address_id: Option<i32>,
    pub status_id: i32,
    pub delivery_man_id: Option<UserId>,
    pub recipient_id: Option<RecipientId>,
    pub updated_by_id: UserId,
}

/// Status change produced by one `apply_outcome` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl StatusChange {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

impl Order {
    /// Rebuild an order from its stored row and items
    pub fn from_row(row: OrderRow, items: Vec<OrderItem>) -> Result<Self, UnknownStatusCode> {
        let status = OrderStatus::try_from(row.status_id)?;
        let loaded = OrderVersion {
            status,
            updated_at: row.updated_at,
        };

        Ok(Self {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            subtotal: row.subtotal,
            total: row.total,
            reference_number: row.reference_number,
            request: row.request,
            encrypted_email: row.encrypted_email,
            delivery_type_id: row.delivery_type_id,
            address_id: row.address_id,
            status,
            delivery_man_id: row.delivery_man_id,
            recipient_id: row.recipient_id,
            updated_by_id: row.updated_by_id,
            items,
            loaded,
        })
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Version the stored row must still have for a save to apply
    pub fn loaded_version(&self) -> OrderVersion {
        self.loaded
    }

    /// Current state as a version, once it has been written
    pub fn version(&self) -> OrderVersion {
        OrderVersion {
            status: self.status,
            updated_at: self.updated_at,
        }
    }

    /// Treat the current state as the stored one
    pub fn mark_saved(&mut self) {
        self.loaded = self.version();
    }

    /// Move the order through the transition table
    pub fn apply_outcome(
        &mut self,
        outcome: DeliveryOutcome,
        updated_by: UserId,
        now: DateTime<Utc>,
    ) -> StatusChange {
        let from = self.status;
        self.status = from.next(outcome);
        self.stamp(updated_by, now);

        StatusChange {
            order_id: self.id,
            from,
            to: self.status,
        }
    }

    pub fn assign_deliveryman(
        &mut self,
        deliveryman: UserId,
        updated_by: UserId,
        now: DateTime<Utc>,
    ) {
        self.delivery_man_id = Some(deliveryman);
        self.stamp(updated_by, now);
    }

    pub fn attach_recipient(
        &mut self,
        recipient: RecipientId,
        updated_by: UserId,
        now: DateTime<Utc>,
    ) {
        self.recipient_id = Some(recipient);
        self.stamp(updated_by, now);
    }

    /// Record who changed the order and when
    pub fn stamp(&mut self, updated_by: UserId, now: DateTime<Utc>) {
        self.updated_at = now;
        self.updated_by_id = updated_by;
    }
}

// ============================================================================
// New Orders - validated, encrypted, not yet persisted
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub reference_number: String,
    pub request: Option<String>,
    pub encrypted_email: Vec<u8>,
    pub delivery_type_id: i32,
    pub address_id: Option<i32>,
    pub updated_by_id: UserId,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub option_id: OptionId,
    pub quantity: i32,
    pub image_url: String,
}

impl NewOrder {
    /// Validate a draft and encrypt its email. Any status on the draft is dropped.
    pub fn prepare(
        draft: OrderDraft,
        cipher: &FieldCipher,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        Self::validate(&draft)?;

        if let Some(requested) = draft.status_id {
            if requested != OrderStatus::Accepted.code() {
                tracing::debug!(
                    requested_status = requested,
                    "Ignoring caller-supplied status on new order"
                );
            }
        }

        let encrypted_email = cipher.encrypt(draft.customer_email.trim())?;
        let reference_number = draft
            .reference_number
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| generate_reference_number(now));

        Ok(Self {
            created_at: now,
            updated_at: now,
            subtotal: draft.subtotal,
            total: draft.total,
            reference_number,
            request: draft.request,
            encrypted_email,
            delivery_type_id: draft.delivery_type_id,
            address_id: draft.address_id,
            updated_by_id: draft.updated_by,
            items: draft
                .items
                .into_iter()
                .map(|item| NewOrderItem {
                    option_id: item.option_id,
                    quantity: item.quantity,
                    image_url: item.image_url,
                })
                .collect(),
        })
    }

    fn validate(draft: &OrderDraft) -> Result<(), OrderError> {
        if draft.items.is_empty() {
            return Err(OrderError::Validation("Order must contain at least one item".to_string()));
        }

        if let Some(item) = draft.items.iter().find(|item| item.quantity <= 0) {
            return Err(OrderError::Validation(format!(
                "Invalid quantity {} for option {}",
                item.quantity, item.option_id
            )));
        }

        if draft.subtotal < Decimal::ZERO {
            return Err(OrderError::Validation("Subtotal cannot be negative".to_string()));
        }

        if draft.total < draft.subtotal {
            return Err(OrderError::Validation(format!(
                "Total {} is lower than subtotal {}",
                draft.total, draft.subtotal
            )));
        }

        if draft.customer_email.trim().is_empty() {
            return Err(OrderError::Validation("Customer email is required".to_string()));
        }

        Ok(())
    }

    /// Every new order starts here
    pub fn status(&self) -> OrderStatus {
        OrderStatus::Accepted
    }

    /// Combine with the identities assigned by storage
    pub fn persisted(self, id: OrderId, item_ids: &[i32]) -> Order {
        let items = self
            .items
            .into_iter()
            .zip(item_ids.iter().copied())
            .map(|(item, item_id)| OrderItem {
                id: item_id,
                order_id: id,
                option_id: item.option_id,
                quantity: item.quantity,
                image_url: item.image_url,
            })
            .collect();

        Order {
            id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            subtotal: self.subtotal,
            total: self.total,
            reference_number: self.reference_number,
            request: self.request,
            encrypted_email: self.encrypted_email,
            delivery_type_id: self.delivery_type_id,
            address_id: self.address_id,
            status: OrderStatus::Accepted,
            delivery_man_id: None,
            recipient_id: None,
            updated_by_id: self.updated_by_id,
            items,
            loaded: OrderVersion {
                status: OrderStatus::Accepted,
                updated_at: self.updated_at,
            },
        }
    }
}

fn generate_reference_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix[..8].to_uppercase())
}

// ============================================================================
// Recipients - delivery proof shared by one or more orders
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderRecipient {
    pub id: RecipientId,
    pub name: String,
    pub signature: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Recipient stamped with the server receive time, awaiting its id
#[derive(Debug, Clone)]
pub struct UnsavedRecipient {
    pub name: String,
    pub signature: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl UnsavedRecipient {
    pub fn stamp(recipient: NewRecipient, now: DateTime<Utc>) -> Self {
        if recipient.received_at.is_some() {
            tracing::debug!("Discarding client-supplied received_at on recipient");
        }

        Self {
            name: recipient.name,
            signature: recipient.signature,
            received_at: now,
        }
    }

    pub fn persisted(self, id: RecipientId) -> OrderRecipient {
        OrderRecipient {
            id,
            name: self.name,
            signature: self.signature,
            received_at: self.received_at,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
