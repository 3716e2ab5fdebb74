// ============================================================================
// Order Domain - Business Logic for Order Aggregate
// ============================================================================
//
// - Value objects (OrderItem, OrderStatus)
// - Events (OrderPlaced, OrderConfirmed, OrderCancelled) and their payload
//   registry
// - Commands (PlaceOrder, ConfirmOrder, CancelOrder)
// - Errors (OrderError)
// - Aggregate (OrderAggregate)
// - Command Handler (OrderCommandHandler)
//
// ============================================================================

pub mod aggregate;
pub mod command_handler;
pub mod commands;
pub mod errors;
pub mod events;
pub mod value_objects;

// Re-export for convenience
pub use aggregate::*;
pub use command_handler::*;
pub use commands::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
