use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::{short_type_name, EventStoreConfiguration, EventStoreKind, StoreConfigurations};
use super::postgres::{PgConnections, PgEventTable};
use super::table::{EventTable, NewEventRow, StoredEventRow};
use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::core::{codec_for, current_codec, Event, EventRecord, PayloadRegistry};
use crate::metrics::PersistenceMetrics;
use crate::utils::cancellable;

// ============================================================================
// Flat Event Store - append-only log per key
// ============================================================================
//
// Type Parameters:
// - `K`: store kind; selects the table configuration and the event type
// - `T`: event table the rows are written to
//
// Responsibilities:
// 1. Encode events with the current codec and insert one row per event
// 2. Replay rows for a key in identifier order, decoding each row with the
//    codec of the version recorded on it
// 3. Fail the whole load on any malformed row
//
// Every I/O operation has a `*_with_cancellation` form taking the signal for
// that call only; the plain form is never cancelled. A cancelled call leaves
// the store usable.
//
// There is no optimistic concurrency check on this path: concurrent writers
// to the same key interleave without conflict detection. Use the stream
// repository when expected-version checks are required.
//
// ============================================================================

pub struct EventStore<K: EventStoreKind, T: EventTable> {
    table: T,
    configurations: Arc<StoreConfigurations>,
    payloads: Arc<PayloadRegistry<K::Event>>,
    metrics: Option<Arc<PersistenceMetrics>>,
    released: bool,
    _kind: PhantomData<K>,
}

impl<K: EventStoreKind> EventStore<K, PgEventTable<'static>> {
    /// Acquire a connection from the pool selected by `K`'s connection key.
    pub async fn connect(
        connections: &PgConnections,
        configurations: Arc<StoreConfigurations>,
        payloads: Arc<PayloadRegistry<K::Event>>,
    ) -> Result<Self> {
        let configuration = configurations.get::<K>()?;
        let pool = connections.pool(configuration.connection_key.as_deref())?;
        let table = PgEventTable::acquire(pool).await?;
        Ok(Self::new(table, configurations, payloads))
    }
}

impl<K: EventStoreKind, T: EventTable> EventStore<K, T> {
    pub fn new(
        table: T,
        configurations: Arc<StoreConfigurations>,
        payloads: Arc<PayloadRegistry<K::Event>>,
    ) -> Self {
        Self {
            table,
            configurations,
            payloads,
            metrics: None,
            released: false,
            _kind: PhantomData,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PersistenceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Configuration for `K`, resolved on every call.
    pub fn configuration(&self) -> Result<Arc<EventStoreConfiguration>> {
        self.configurations.get::<K>()
    }

    pub async fn save(
        &mut self,
        key: &str,
        event: &K::Event,
        correlation_id: Option<&str>,
    ) -> Result<()> {
        self.save_with_cancellation(key, event, correlation_id, &CancellationToken::new())
            .await
    }

    pub async fn save_with_cancellation(
        &mut self,
        key: &str,
        event: &K::Event,
        correlation_id: Option<&str>,
        token: &CancellationToken,
    ) -> Result<()> {
        self.ensure_open()?;
        let configuration = self.configuration()?;

        let codec = current_codec();
        let metadata = codec.encode(event);
        let row = NewEventRow {
            key: key.to_string(),
            event_type: metadata.event_type.clone(),
            payload: configuration.serializer.to_json(event)?,
            metadata: configuration.serializer.to_json(&metadata)?,
            version: codec.version().to_string(),
            correlation_id: correlation_id.map(str::to_string),
        };

        cancellable(token, self.table.insert(&configuration, row)).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_saved(event.event_type());
        }
        tracing::debug!(
            key = %key,
            event_type = event.event_type(),
            table = %configuration.target_table_fqn(),
            "Saved event"
        );

        Ok(())
    }

    /// One insert per event, in order. A failure part-way leaves the events
    /// already saved in place.
    pub async fn save_all(
        &mut self,
        key: &str,
        events: &[K::Event],
        correlation_id: Option<&str>,
    ) -> Result<()> {
        self.save_all_with_cancellation(key, events, correlation_id, &CancellationToken::new())
            .await
    }

    pub async fn save_all_with_cancellation(
        &mut self,
        key: &str,
        events: &[K::Event],
        correlation_id: Option<&str>,
        token: &CancellationToken,
    ) -> Result<()> {
        for event in events {
            self.save_with_cancellation(key, event, correlation_id, token).await?;
        }

        tracing::info!(key = %key, event_count = events.len(), "Saved events");
        Ok(())
    }

    pub async fn load_events(&mut self, key: &str) -> Result<Vec<K::Event>> {
        self.load_events_with_cancellation(key, &CancellationToken::new()).await
    }

    pub async fn load_events_with_cancellation(
        &mut self,
        key: &str,
        token: &CancellationToken,
    ) -> Result<Vec<K::Event>> {
        let records = self.load_records_with_cancellation(key, token).await?;
        Ok(records.into_iter().map(|record| record.payload).collect())
    }

    pub async fn load_records(&mut self, key: &str) -> Result<Vec<EventRecord<K::Event>>> {
        self.load_records_with_cancellation(key, &CancellationToken::new()).await
    }

    pub async fn load_records_with_cancellation(
        &mut self,
        key: &str,
        token: &CancellationToken,
    ) -> Result<Vec<EventRecord<K::Event>>> {
        self.ensure_open()?;
        let configuration = self.configuration()?;
        let started = Instant::now();

        let rows = cancellable(token, self.table.select_by_key(&configuration, key)).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.decode_row(key, row)?);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_loaded(short_type_name::<K>(), records.len(), started.elapsed());
        }
        tracing::debug!("Loaded {} events for key {}", records.len(), key);

        Ok(records)
    }

    fn decode_row(&self, key: &str, row: StoredEventRow) -> Result<EventRecord<K::Event>> {
        let id = row.id;
        let version = row
            .version
            .ok_or_else(|| EventSourcingError::malformed(key, id, "record version not specified"))?;
        let metadata_json = row
            .metadata
            .ok_or_else(|| EventSourcingError::malformed(key, id, "event metadata not found"))?;
        let timestamp = row
            .timestamp
            .ok_or_else(|| EventSourcingError::malformed(key, id, "invalid event timestamp"))?;

        let codec = codec_for(&version)?;
        let metadata = codec
            .decode_metadata(&metadata_json)
            .ok_or_else(|| EventSourcingError::malformed(key, id, "could not read event metadata"))?;

        let payload_json = row
            .payload
            .ok_or_else(|| EventSourcingError::malformed(key, id, "event payload not found"))?;
        let payload_value: serde_json::Value = serde_json::from_str(&payload_json)
            .map_err(|_| EventSourcingError::malformed(key, id, "could not parse event payload"))?;
        let payload = codec.decode_payload(payload_value, &metadata, &self.payloads)?;

        Ok(EventRecord {
            id,
            key: key.to_string(),
            event_type: metadata.event_type.clone(),
            payload,
            metadata,
            timestamp,
            version,
            correlation_id: row.correlation_id,
        })
    }

    /// Release the table's connection. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.table.release().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(EventSourcingError::Disposed);
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::EventMetadata;
    use crate::event_sourcing::store::config::EventSourcingBuilder;
    use crate::event_sourcing::store::table::InMemoryEventTable;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[serde(tag = "type", content = "data")]
    enum OrderLogEvent {
        OrderPlaced { order_id: String, time: DateTime<Utc> },
        OrderShipped { order_id: String, time: DateTime<Utc> },
    }

    impl Event for OrderLogEvent {
        fn event_type(&self) -> &'static str {
            match self {
                OrderLogEvent::OrderPlaced { .. } => "OrderPlaced",
                OrderLogEvent::OrderShipped { .. } => "OrderShipped",
            }
        }

        fn initiation_instant(&self) -> DateTime<Utc> {
            match self {
                OrderLogEvent::OrderPlaced { time, .. } | OrderLogEvent::OrderShipped { time, .. } => *time,
            }
        }
    }

    struct OrderLog;
    impl EventStoreKind for OrderLog {
        type Event = OrderLogEvent;
    }

    struct UnregisteredLog;
    impl EventStoreKind for UnregisteredLog {
        type Event = OrderLogEvent;
    }

    fn payloads() -> Arc<PayloadRegistry<OrderLogEvent>> {
        Arc::new(PayloadRegistry::new().register_all_serde(["OrderPlaced", "OrderShipped"]))
    }

    fn configurations() -> Arc<StoreConfigurations> {
        EventSourcingBuilder::new()
            .use_event_store::<OrderLog>(|c| c.target_schema = Some("sales".to_string()))
            .build()
    }

    fn store(table: &InMemoryEventTable) -> EventStore<OrderLog, InMemoryEventTable> {
        EventStore::new(table.clone(), configurations(), payloads())
    }

    fn placed(second: u32) -> OrderLogEvent {
        OrderLogEvent::OrderPlaced {
            order_id: "O1".to_string(),
            time: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, second).unwrap(),
        }
    }

    fn shipped(second: u32) -> OrderLogEvent {
        OrderLogEvent::OrderShipped {
            order_id: "O1".to_string(),
            time: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, second).unwrap(),
        }
    }

    fn raw_row() -> StoredEventRow {
        let metadata = EventMetadata::new("1.0", "OrderPlaced", "OrderPlaced");
        StoredEventRow {
            id: 0,
            key: "O1".to_string(),
            event_type: Some("OrderPlaced".to_string()),
            payload: Some(serde_json::to_string(&placed(0)).unwrap()),
            metadata: Some(serde_json::to_string(&metadata).unwrap()),
            timestamp: Some(Utc::now()),
            version: Some("1.0".to_string()),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_single_event_round_trip() {
        let table = InMemoryEventTable::new();
        let mut store = store(&table);

        store.save("O1", &placed(0), None).await.unwrap();

        let events = store.load_events("O1").await.unwrap();
        assert_eq!(events, vec![placed(0)]);
    }

    #[tokio::test]
    async fn test_load_returns_save_order() {
        let table = InMemoryEventTable::new();
        let mut store = store(&table);

        store.save("O1", &placed(0), None).await.unwrap();
        store.save("O1", &shipped(1), None).await.unwrap();

        let events = store.load_events("O1").await.unwrap();
        assert_eq!(events, vec![placed(0), shipped(1)]);
    }

    #[tokio::test]
    async fn test_save_order_wins_over_event_time() {
        let table = InMemoryEventTable::new();
        let mut store = store(&table);

        // Saved out of chronological order; replay follows the identifier.
        store.save_all("O1", &[shipped(9), placed(0)], None).await.unwrap();

        let events = store.load_events("O1").await.unwrap();
        assert_eq!(events, vec![shipped(9), placed(0)]);
    }

    #[tokio::test]
    async fn test_records_carry_row_details() {
        let table = InMemoryEventTable::new();
        let mut store = store(&table);

        store.save("O1", &placed(0), Some("corr-1")).await.unwrap();
        store.save("O2", &placed(1), None).await.unwrap();

        let records = store.load_records("O1").await.unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.key, "O1");
        assert_eq!(record.event_type, "OrderPlaced");
        assert_eq!(record.version, "1.0");
        assert_eq!(record.metadata.fully_qualified_name, "OrderPlaced");
        assert_eq!(record.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(record.payload, placed(0));
    }

    #[tokio::test]
    async fn test_rows_land_in_configured_table() {
        let table = InMemoryEventTable::new();
        let mut store = store(&table);

        store.save("O1", &placed(0), None).await.unwrap();

        assert_eq!(table.rows("sales.event").await.len(), 1);
        assert!(table.rows("event").await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key_loads_empty() {
        let table = InMemoryEventTable::new();
        let mut store = store(&table);

        assert!(store.load_events("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_store_kind_fails() {
        let table = InMemoryEventTable::new();
        let mut store: EventStore<UnregisteredLog, _> =
            EventStore::new(table.clone(), configurations(), payloads());

        let err = store.save("O1", &placed(0), None).await.unwrap_err();
        assert!(matches!(err, EventSourcingError::ConfigurationNotFound { .. }));
        assert!(table.rows("event").await.is_empty());
    }

    #[tokio::test]
    async fn test_row_written_by_unknown_version_fails_load() {
        let table = InMemoryEventTable::new();
        let mut row = raw_row();
        row.version = Some("2.0".to_string());
        table.insert_raw("sales.event", row).await;

        let err = store(&table).load_events("O1").await.unwrap_err();
        assert!(matches!(err, EventSourcingError::UnsupportedRecordVersion { .. }));
    }

    #[tokio::test]
    async fn test_malformed_row_aborts_whole_load() {
        type Damage = fn(&mut StoredEventRow);
        let cases: Vec<(Damage, &str)> = vec![
            ((|r: &mut StoredEventRow| r.version = None) as Damage, "version"),
            ((|r: &mut StoredEventRow| r.metadata = None) as Damage, "metadata"),
            ((|r: &mut StoredEventRow| r.metadata = Some("{broken".to_string())) as Damage, "metadata"),
            ((|r: &mut StoredEventRow| r.timestamp = None) as Damage, "timestamp"),
            ((|r: &mut StoredEventRow| r.payload = None) as Damage, "payload"),
            ((|r: &mut StoredEventRow| r.payload = Some("{not json".to_string())) as Damage, "payload"),
        ];

        for (damage, what) in cases {
            let table = InMemoryEventTable::new();
            let mut store = store(&table);
            store.save("O1", &placed(0), None).await.unwrap();

            let mut row = raw_row();
            damage(&mut row);
            table.insert_raw("sales.event", row).await;
            store.save("O1", &shipped(2), None).await.unwrap();

            let err = store.load_events("O1").await.unwrap_err();
            assert!(
                matches!(err, EventSourcingError::MalformedEventRecord { ref reason, .. } if reason.contains(what)),
                "expected malformed {} error, got {:?}",
                what,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_unregistered_payload_tag_fails_load() {
        let table = InMemoryEventTable::new();
        let mut row = raw_row();
        row.metadata = Some(
            serde_json::to_string(&EventMetadata::new("1.0", "OrderLost", "OrderLost")).unwrap(),
        );
        table.insert_raw("sales.event", row).await;

        let err = store(&table).load_events("O1").await.unwrap_err();
        assert!(matches!(err, EventSourcingError::PayloadTypeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_null_payload_is_decode_failure() {
        let table = InMemoryEventTable::new();
        let mut row = raw_row();
        row.payload = Some("null".to_string());
        table.insert_raw("sales.event", row).await;

        let err = store(&table).load_events("O1").await.unwrap_err();
        assert!(matches!(err, EventSourcingError::PayloadDecodeFailed { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_call_leaves_store_usable() {
        let table = InMemoryEventTable::new();
        let mut store = store(&table);
        let token = CancellationToken::new();
        token.cancel();

        let err = store
            .save_with_cancellation("O1", &placed(0), None, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, EventSourcingError::Cancelled));
        let err = store.load_records_with_cancellation("O1", &token).await.unwrap_err();
        assert!(matches!(err, EventSourcingError::Cancelled));
        assert!(table.rows("sales.event").await.is_empty());

        store.save("O1", &placed(0), None).await.unwrap();
        assert_eq!(store.load_events("O1").await.unwrap(), vec![placed(0)]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let table = InMemoryEventTable::new();
        let mut store = store(&table);

        store.close().await.unwrap();
        store.close().await.unwrap();

        let err = store.load_events("O1").await.unwrap_err();
        assert!(matches!(err, EventSourcingError::Disposed));
    }

    #[tokio::test]
    async fn test_metrics_count_saved_and_loaded_events() {
        let table = InMemoryEventTable::new();
        let metrics = Arc::new(PersistenceMetrics::new().unwrap());
        let mut store = store(&table).with_metrics(metrics.clone());

        store.save_all("O1", &[placed(0), shipped(1)], None).await.unwrap();
        store.load_events("O1").await.unwrap();

        assert_eq!(metrics.events_saved.with_label_values(&["OrderPlaced"]).get(), 1);
        assert_eq!(metrics.events_saved.with_label_values(&["OrderShipped"]).get(), 1);
        assert_eq!(metrics.events_loaded.get(), 2);
        assert_eq!(
            metrics.load_duration.with_label_values(&["OrderLog"]).get_sample_count(),
            1
        );
    }
}
