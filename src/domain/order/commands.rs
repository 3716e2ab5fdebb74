use uuid::Uuid;
use super::value_objects::OrderItem;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrderCommand {
    PlaceOrder {
        customer_id: Uuid,
        items: Vec<OrderItem>,
    },
    ConfirmOrder,
    CancelOrder {
        reason: Option<String>,
    },
}
