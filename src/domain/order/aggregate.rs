use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, EventSource, EventSourceState};
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::*;
use super::value_objects::{OrderItem, OrderStatus};

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// Commands are validated against current state, then every resulting event
// is applied and recorded as pending. The repository persists the pending
// events and flushes them after commit.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderAggregate {
    state: EventSourceState<OrderEvent>,

    // Current State (derived from events)
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_reason: Option<String>,
}

impl OrderAggregate {
    /// New, unpersisted order with its `OrderPlaced` event pending.
    pub fn place(order_id: &str, customer_id: Uuid, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        validate_items(&items)?;

        let event = OrderEvent::Placed(OrderPlaced {
            order_id: order_id.to_string(),
            customer_id,
            items,
            placed_at: Utc::now(),
        });
        let mut order = Self::apply_first_event(order_id, &event)?;
        order.state.record(event);
        Ok(order)
    }

    pub fn handle(&mut self, command: &OrderCommand) -> Result<(), OrderError> {
        let event = match command {
            OrderCommand::PlaceOrder { .. } => return Err(OrderError::AlreadyPlaced),

            OrderCommand::ConfirmOrder => {
                match self.status {
                    OrderStatus::Placed => {}
                    OrderStatus::Confirmed => return Err(OrderError::AlreadyConfirmed),
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                }

                OrderEvent::Confirmed(OrderConfirmed {
                    confirmed_at: Utc::now(),
                })
            }

            OrderCommand::CancelOrder { reason } => {
                if self.status == OrderStatus::Cancelled {
                    return Err(OrderError::AlreadyCancelled);
                }

                OrderEvent::Cancelled(OrderCancelled {
                    reason: reason.clone(),
                    cancelled_at: Utc::now(),
                })
            }
        };

        self.raise(event)
    }

    fn raise(&mut self, event: OrderEvent) -> Result<(), OrderError> {
        self.apply_event(&event)?;
        self.state.record(event);
        Ok(())
    }
}

fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyItems);
    }

    for item in items {
        if item.quantity <= 0 {
            return Err(OrderError::InvalidQuantity(item.quantity));
        }
    }

    Ok(())
}

// ============================================================================
// Event Source / Aggregate Implementation
// ============================================================================

impl EventSource for OrderAggregate {
    type Event = OrderEvent;
    const STREAM_TYPE: &'static str = "order";

    fn identity(&self) -> &str {
        self.state.id()
    }

    fn version(&self) -> i64 {
        self.state.version()
    }

    fn pending_events(&self) -> &[OrderEvent] {
        self.state.pending()
    }

    fn flush(&mut self) {
        self.state.flush();
    }
}

impl Aggregate for OrderAggregate {
    type Error = OrderError;

    fn apply_first_event(id: &str, event: &OrderEvent) -> Result<Self, OrderError> {
        match event {
            OrderEvent::Placed(e) => Ok(Self {
                state: EventSourceState::new(id),
                customer_id: e.customer_id,
                items: e.items.clone(),
                status: OrderStatus::Placed,
                placed_at: e.placed_at,
                updated_at: e.placed_at,
                cancelled_reason: None,
            }),
            _ => Err(OrderError::NotInitialized),
        }
    }

    fn apply_event(&mut self, event: &OrderEvent) -> Result<(), OrderError> {
        match event {
            OrderEvent::Placed(_) => return Err(OrderError::AlreadyPlaced),
            OrderEvent::Confirmed(e) => {
                self.status = OrderStatus::Confirmed;
                self.updated_at = e.confirmed_at;
            }
            OrderEvent::Cancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancelled_reason = e.reason.clone();
                self.updated_at = e.cancelled_at;
            }
        }
        Ok(())
    }

    fn restore_version(&mut self, version: i64) {
        self.state.restore_version(version);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
