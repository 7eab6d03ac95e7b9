// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Storage, transports and configuration live outside this layer and are
// handed in through traits (`OrderRepository`, `ChangeNotifier`).
//
// ============================================================================

pub mod order;
