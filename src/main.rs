use chrono::Utc;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use sql_event_sourcing::domain::order::{
    order_payloads, OrderAggregate, OrderCommand, OrderCommandHandler, OrderConfirmed, OrderEvent,
    OrderEventLog, OrderItem, OrderPlaced,
};
use sql_event_sourcing::event_sourcing::{
    ensure_schema, ChannelPublisher, DatabaseConfig, Event, EventSource, EventSourcingBuilder,
    EventStore, EventTable, InMemoryEventTable, InMemoryStreamStore, PgConnections,
    StoreConfigurations, StreamRepository,
};
use sql_event_sourcing::metrics::PersistenceMetrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO, crate at DEBUG; override with RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sql_event_sourcing=debug")),
        )
        .init();

    tracing::info!("Starting event sourcing demo");

    let metrics = Arc::new(PersistenceMetrics::new()?);
    let payloads = Arc::new(order_payloads());
    let database = DatabaseConfig::from_env();

    // === 1. Flat event store ===
    let order_id = format!("order-{}", Uuid::new_v4());
    let audit_trail = vec![
        OrderEvent::Placed(OrderPlaced {
            order_id: order_id.clone(),
            customer_id: Uuid::new_v4(),
            items: vec![OrderItem::new(Uuid::new_v4(), 2)],
            placed_at: Utc::now(),
        }),
        OrderEvent::Confirmed(OrderConfirmed {
            confirmed_at: Utc::now(),
        }),
    ];

    match &database {
        Some(database) => {
            tracing::info!("Using Postgres event store");
            let configurations = configurations(database.schema.clone());
            let pool = database.connect().await?;

            let configuration = configurations.get::<OrderEventLog>()?;
            let mut connection = pool.acquire().await?;
            ensure_schema(&mut connection, &configuration).await?;
            drop(connection);

            let connections = PgConnections::new(pool);
            let store = EventStore::<OrderEventLog, _>::connect(&connections, configurations, payloads)
                .await?
                .with_metrics(metrics.clone());
            run_flat_store(store, &order_id, &audit_trail).await?;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory event store");
            let store = EventStore::<OrderEventLog, _>::new(
                InMemoryEventTable::new(),
                configurations(None),
                payloads,
            )
            .with_metrics(metrics.clone());
            run_flat_store(store, &order_id, &audit_trail).await?;
        }
    }

    // === 2. Stream repository ===
    run_streams(metrics.clone()).await?;

    println!("{}", metrics.render()?);
    tracing::info!("Demo complete");
    Ok(())
}

fn configurations(schema: Option<String>) -> Arc<StoreConfigurations> {
    EventSourcingBuilder::new()
        .use_event_store::<OrderEventLog>(|config| {
            config.target_table = "order_event".to_string();
            config.target_schema = schema;
        })
        .build()
}

async fn run_flat_store<T: EventTable>(
    mut store: EventStore<OrderEventLog, T>,
    order_id: &str,
    events: &[OrderEvent],
) -> anyhow::Result<()> {
    let correlation_id = Uuid::new_v4().to_string();
    store.save_all(order_id, events, Some(&correlation_id)).await?;

    for record in store.load_records(order_id).await? {
        tracing::info!(
            id = record.id,
            event_type = %record.event_type,
            record_version = %record.version,
            timestamp = %record.timestamp,
            "Replayed event record"
        );
    }

    store.close().await?;
    Ok(())
}

/// Single store through the command handler, then a batch, then a deferred
/// commit, all against one in-memory stream database.
async fn run_streams(metrics: Arc<PersistenceMetrics>) -> anyhow::Result<()> {
    let streams = InMemoryStreamStore::<OrderEvent>::new();
    let (publisher, mut published) = ChannelPublisher::<OrderEvent>::new();
    let publisher = Arc::new(publisher);

    let consumer = tokio::spawn(async move {
        while let Some(batch) = published.recv().await {
            for committed in &batch {
                tracing::info!(
                    stream_id = %committed.stream_id,
                    event_type = committed.event.event_type(),
                    "Received published event"
                );
            }
        }
    });

    // Single entity, through the command handler
    let handler = OrderCommandHandler::new(
        StreamRepository::new(streams.session())
            .with_publisher(publisher.clone())
            .with_metrics(metrics.clone()),
    );
    let placed = OrderCommand::PlaceOrder {
        customer_id: Uuid::new_v4(),
        items: vec![OrderItem::new(Uuid::new_v4(), 1)],
    };
    handler.handle("order-1", placed).await?;
    let version = handler.handle("order-1", OrderCommand::ConfirmOrder).await?;
    tracing::info!(order_id = "order-1", version, "Order confirmed");
    handler.close().await?;

    // Batch of new entities, one commit
    let mut repository = StreamRepository::<_, OrderAggregate>::new(streams.session())
        .with_publisher(publisher.clone())
        .with_metrics(metrics.clone());
    let mut orders = vec![
        OrderAggregate::place("order-2", Uuid::new_v4(), vec![OrderItem::new(Uuid::new_v4(), 3)])?,
        OrderAggregate::place("order-3", Uuid::new_v4(), vec![OrderItem::new(Uuid::new_v4(), 1)])?,
    ];
    repository.store_all(&mut orders).await?;

    // Deferred: stage each change, commit once
    repository.begin()?;
    for mut order in orders {
        order.handle(&OrderCommand::CancelOrder {
            reason: Some("demo".to_string()),
        })?;
        repository.stage(order).await?;
    }
    for order in repository.commit().await? {
        tracing::info!(
            order_id = %order.identity(),
            version = order.version(),
            status = ?order.status,
            "Deferred change committed"
        );
    }

    if let Some(order) = repository.load("order-1").await? {
        tracing::info!(order_id = %order.identity(), status = ?order.status, "Reloaded order");
    }
    repository.close().await?;

    drop(repository);
    drop(handler);
    drop(publisher);
    consumer.await?;
    Ok(())
}
