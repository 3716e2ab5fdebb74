use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::event_sourcing::core::{Event, PayloadRegistry};
use crate::event_sourcing::store::EventStoreKind;
use super::value_objects::OrderItem;

// ============================================================================
// Order Events - Domain Events for Order Aggregate
// ============================================================================

/// Order Event - Union type for all order events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Placed(OrderPlaced),
    Confirmed(OrderConfirmed),
    Cancelled(OrderCancelled),
}

/// Type tags written to event metadata.
pub const ORDER_EVENT_TAGS: [&str; 3] = ["OrderPlaced", "OrderConfirmed", "OrderCancelled"];

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "OrderPlaced",
            OrderEvent::Confirmed(_) => "OrderConfirmed",
            OrderEvent::Cancelled(_) => "OrderCancelled",
        }
    }

    fn initiation_instant(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Placed(e) => e.placed_at,
            OrderEvent::Confirmed(e) => e.confirmed_at,
            OrderEvent::Cancelled(e) => e.cancelled_at,
        }
    }
}

/// Decoders for every order event tag.
pub fn order_payloads() -> PayloadRegistry<OrderEvent> {
    PayloadRegistry::new().register_all_serde(ORDER_EVENT_TAGS)
}

/// Flat event store kind holding the order audit log.
pub struct OrderEventLog;

impl EventStoreKind for OrderEventLog {
    type Event = OrderEvent;
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Order Placed - Initial event in order lifecycle
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderPlaced {
    pub order_id: String,
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub placed_at: DateTime<Utc>,
}

/// Order Confirmed - Order accepted for fulfillment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderConfirmed {
    pub confirmed_at: DateTime<Utc>,
}

/// Order Cancelled - Order lifecycle ended
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::current_codec;

    #[test]
    fn test_every_tag_decodes_through_the_registry() {
        let payloads = order_payloads();
        let codec = current_codec();
        let events = vec![
            OrderEvent::Placed(OrderPlaced {
                order_id: "O1".to_string(),
                customer_id: Uuid::new_v4(),
                items: vec![OrderItem::new(Uuid::new_v4(), 2)],
                placed_at: Utc::now(),
            }),
            OrderEvent::Confirmed(OrderConfirmed { confirmed_at: Utc::now() }),
            OrderEvent::Cancelled(OrderCancelled { reason: None, cancelled_at: Utc::now() }),
        ];

        for event in events {
            let metadata = codec.encode(&event);
            assert!(payloads.contains(&metadata.fully_qualified_name));

            let payload = serde_json::to_value(&event).unwrap();
            let decoded: OrderEvent = codec.decode_payload(payload, &metadata, &payloads).unwrap();
            assert_eq!(decoded, event);
        }
    }
}
