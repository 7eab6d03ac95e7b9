use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, FieldCipher};
use super::aggregate::OrderRecipient;
use super::value_objects::{OptionId, OrderId, OrderStatus, UserId};

// ============================================================================
// Read Projection - what the display paths fetch
// ============================================================================
//
// Join graph loaded by `load_order_records`:
//
//   Order ── DeliveryType
//         ├─ Address ── Hotel            (both optional)
//         ├─ Deliveryman (User)          (optional)
//         ├─ OrderRecipient              (optional)
//         ├─ UpdatedBy (User)
//         └─ OrderItem* ── Option ── Product
//
// The email is carried encrypted (`OrderRecord`) until the engine decrypts
// it into an `OrderView`.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails<Email> {
    pub id: OrderId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub reference_number: String,
    pub request: Option<String>,
    pub customer_email: Email,
    pub status: OrderStatus,
    pub delivery_type: DeliveryTypeRef,
    pub address: Option<AddressRef>,
    pub deliveryman: Option<UserRef>,
    pub recipient: Option<OrderRecipient>,
    pub updated_by: UserRef,
    pub items: Vec<OrderItemDetails>,
}

pub type OrderRecord = OrderDetails<Vec<u8>>;
pub type OrderView = OrderDetails<String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTypeRef {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRef {
    pub id: i32,
    pub line: String,
    pub hotel: Option<HotelRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelRef {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemDetails {
    pub id: i32,
    pub quantity: i32,
    pub image_url: String,
    pub option: OptionRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionRef {
    pub id: OptionId,
    pub name: String,
    pub product: ProductRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: i32,
    pub name: String,
}

impl OrderRecord {
    pub fn decrypt(self, cipher: &FieldCipher) -> Result<OrderView, CodecError> {
        let customer_email = cipher.decrypt(&self.customer_email)?;

        Ok(OrderDetails {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            subtotal: self.subtotal,
            total: self.total,
            reference_number: self.reference_number,
            request: self.request,
            customer_email,
            status: self.status,
            delivery_type: self.delivery_type,
            address: self.address,
            deliveryman: self.deliveryman,
            recipient: self.recipient,
            updated_by: self.updated_by,
            items: self.items,
        })
    }
}
