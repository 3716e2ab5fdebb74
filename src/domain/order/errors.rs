use super::value_objects::OrderStatus;
use crate::error::EventSourcingError;
use crate::utils::IsTransient;

// ============================================================================
// Order Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order is already placed")]
    AlreadyPlaced,

    #[error("Order is already cancelled")]
    AlreadyCancelled,

    #[error("Order is already confirmed")]
    AlreadyConfirmed,

    #[error("Cannot change order in status: {0:?}")]
    InvalidStatusTransition(OrderStatus),

    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Order stream must start with OrderPlaced")]
    NotInitialized,

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Persistence(#[from] EventSourcingError),
}

impl IsTransient for OrderError {
    fn is_transient(&self) -> bool {
        match self {
            OrderError::Persistence(error) => error.is_transient(),
            _ => false,
        }
    }
}
