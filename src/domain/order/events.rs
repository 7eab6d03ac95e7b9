use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{OptionId, OrderId};

// ============================================================================
// Change Events - raised after a committed mutation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    OrderChanged { order_id: OrderId },
    OrdersChanged { order_ids: Vec<OrderId> },
    LowStock { option_id: OptionId },
}

impl ChangeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::OrderChanged { .. } => "OrderChanged",
            ChangeEvent::OrdersChanged { .. } => "OrdersChanged",
            ChangeEvent::LowStock { .. } => "LowStock",
        }
    }

    /// Keys for partitioned transports, one per entity the event concerns.
    /// Publishing under every key keeps each entity's events in raise order.
    pub fn partition_keys(&self) -> Vec<String> {
        match self {
            ChangeEvent::OrderChanged { order_id } => vec![format!("order-{}", order_id)],
            ChangeEvent::OrdersChanged { order_ids } => order_ids
                .iter()
                .map(|id| format!("order-{}", id))
                .collect(),
            ChangeEvent::LowStock { option_id } => vec![format!("option-{}", option_id)],
        }
    }

    /// Whether observers of `order_id` should refresh on this event
    pub fn concerns_order(&self, order_id: OrderId) -> bool {
        match self {
            ChangeEvent::OrderChanged { order_id: id } => *id == order_id,
            ChangeEvent::OrdersChanged { order_ids } => order_ids.contains(&order_id),
            ChangeEvent::LowStock { .. } => false,
        }
    }
}

/// Envelope sent to observers and transports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event_id: Uuid,
    pub event_type: String,
    pub event: ChangeEvent,
    pub raised_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(event: ChangeEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            event,
            raised_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
