use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::value_objects::{OptionId, UserId};

// ============================================================================
// Order Inputs - caller-supplied payloads for the lifecycle engine
// ============================================================================

/// Order as submitted by a caller, before validation and encryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDraft {
    pub subtotal: Decimal,
    pub total: Decimal,
    /// Generated when absent
    pub reference_number: Option<String>,
    pub request: Option<String>,
    pub customer_email: String,
    pub delivery_type_id: i32,
    pub address_id: Option<i32>,
    /// Ignored: new orders always start as Accepted
    pub status_id: Option<i32>,
    pub updated_by: UserId,
    pub items: Vec<DraftItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftItem {
    pub option_id: OptionId,
    pub quantity: i32,
    pub image_url: String,
}

/// Delivery confirmation captured at hand-off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipient {
    pub name: String,
    pub signature: Vec<u8>,
    /// Discarded: the server stamps the receive time
    pub received_at: Option<DateTime<Utc>>,
}
