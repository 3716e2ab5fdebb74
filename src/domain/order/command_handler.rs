use tokio::sync::Mutex;

use crate::event_sourcing::core::EventSource;
use crate::event_sourcing::stream::{StreamRepository, StreamStore};
use crate::utils::{retry_on_transient, RetryConfig};

use super::aggregate::OrderAggregate;
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::OrderEvent;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Pending Events → Stream Repository
//
// A concurrency conflict means the order changed underneath us; the whole
// load/handle/store cycle is retried against fresh state.
//
// ============================================================================

pub struct OrderCommandHandler<S>
where
    S: StreamStore<Event = OrderEvent>,
{
    repository: Mutex<StreamRepository<S, OrderAggregate>>,
    retry: RetryConfig,
}

impl<S> OrderCommandHandler<S>
where
    S: StreamStore<Event = OrderEvent>,
{
    pub fn new(repository: StreamRepository<S, OrderAggregate>) -> Self {
        Self {
            repository: Mutex::new(repository),
            retry: RetryConfig::for_conflicts(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Handle a command and persist the resulting events. Returns the
    /// order's version after the commit.
    pub async fn handle(&self, order_id: &str, command: OrderCommand) -> Result<i64, OrderError> {
        let command = &command;
        retry_on_transient(self.retry.clone(), move |attempt| async move {
            tracing::debug!(order_id = %order_id, attempt, "Handling order command");
            self.handle_once(order_id, command).await
        })
        .await
        .into_result()
    }

    async fn handle_once(&self, order_id: &str, command: &OrderCommand) -> Result<i64, OrderError> {
        let mut repository = self.repository.lock().await;

        let mut order = match command {
            OrderCommand::PlaceOrder { customer_id, items } => {
                if repository.load(order_id).await?.is_some() {
                    return Err(OrderError::AlreadyPlaced);
                }
                OrderAggregate::place(order_id, *customer_id, items.clone())?
            }
            _ => {
                let mut order = repository
                    .load(order_id)
                    .await?
                    .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;
                order.handle(command)?;
                order
            }
        };

        repository.store(&mut order).await?;
        Ok(order.version())
    }

    pub async fn load(&self, order_id: &str) -> Result<Option<OrderAggregate>, OrderError> {
        Ok(self.repository.lock().await.load(order_id).await?)
    }

    pub async fn close(&self) -> Result<(), OrderError> {
        Ok(self.repository.lock().await.close().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EventSourcingError, Result};
    use crate::event_sourcing::core::Aggregate;
    use crate::event_sourcing::stream::{InMemoryStreamStore, StreamQuery};
    use crate::domain::order::{OrderItem, OrderStatus};
    use async_trait::async_trait;
    use std::time::Duration;
    use uuid::Uuid;

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn place() -> OrderCommand {
        OrderCommand::PlaceOrder {
            customer_id: Uuid::new_v4(),
            items: vec![OrderItem::new(Uuid::new_v4(), 1)],
        }
    }

    fn handler() -> OrderCommandHandler<InMemoryStreamStore<OrderEvent>> {
        OrderCommandHandler::new(StreamRepository::new(InMemoryStreamStore::new())).with_retry(quick_retry())
    }

    #[tokio::test]
    async fn test_order_lifecycle_advances_version() {
        let handler = handler();

        assert_eq!(handler.handle("O1", place()).await.unwrap(), 1);
        assert_eq!(handler.handle("O1", OrderCommand::ConfirmOrder).await.unwrap(), 2);
        let version = handler
            .handle("O1", OrderCommand::CancelOrder { reason: None })
            .await
            .unwrap();
        assert_eq!(version, 3);

        let order = handler.load("O1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.version(), 3);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let handler = handler();

        let err = handler.handle("O1", OrderCommand::ConfirmOrder).await.unwrap_err();
        assert!(matches!(err, OrderError::NotFound(ref id) if id == "O1"));

        handler.handle("O1", place()).await.unwrap();
        assert!(matches!(handler.handle("O1", place()).await, Err(OrderError::AlreadyPlaced)));
    }

    /// Reports a conflict on the first commit, then behaves normally.
    struct ConflictOnce {
        inner: InMemoryStreamStore<OrderEvent>,
        conflicted: bool,
    }

    #[async_trait]
    impl StreamStore for ConflictOnce {
        type Event = OrderEvent;

        async fn start_stream(&mut self, stream_type: &str, id: &str, events: Vec<OrderEvent>) -> Result<()> {
            self.inner.start_stream(stream_type, id, events).await
        }

        async fn append(&mut self, id: &str, expected_version: i64, events: Vec<OrderEvent>) -> Result<()> {
            self.inner.append(id, expected_version, events).await
        }

        async fn aggregate_stream<A>(&mut self, id: &str, query: StreamQuery) -> Result<Option<A>>
        where
            A: Aggregate<Event = OrderEvent>,
        {
            self.inner.aggregate_stream(id, query).await
        }

        async fn save_changes(&mut self) -> Result<()> {
            if !self.conflicted {
                self.conflicted = true;
                return Err(EventSourcingError::ConcurrencyConflict {
                    stream_id: "O1".to_string(),
                    expected: 0,
                    actual: 1,
                });
            }
            self.inner.save_changes().await
        }

        async fn discard_changes(&mut self) -> Result<()> {
            self.inner.discard_changes().await
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried_with_fresh_state() {
        let store = ConflictOnce { inner: InMemoryStreamStore::new(), conflicted: false };
        let handler = OrderCommandHandler::new(StreamRepository::new(store)).with_retry(quick_retry());

        assert_eq!(handler.handle("O1", place()).await.unwrap(), 1);
        assert!(handler.load("O1").await.unwrap().is_some());
    }
}
