// ============================================================================
// Order Domain - lifecycle of hotel delivery orders
// ============================================================================
//
// - Value objects (OrderStatus, DeliveryOutcome, ids)
// - Commands (OrderDraft, NewRecipient)
// - Aggregate (Order, NewOrder, recipients)
// - Read projection (OrderRecord / OrderView)
// - Change events raised after commits
// - Errors (OrderError)
// - Engine (OrderLifecycleEngine)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod views;
pub mod engine;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use views::*;
pub use engine::*;
