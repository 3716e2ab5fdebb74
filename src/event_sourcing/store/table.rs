use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::config::EventStoreConfiguration;
use crate::error::{EventSourcingError, Result};

// ============================================================================
// Event Table - row-level access for the flat event store
// ============================================================================
//
// The event store owns encoding, decoding and validation; a table only
// inserts rows and returns the rows of one key ordered by identifier.
//
// ============================================================================

/// Row to insert. Identifier and timestamp are assigned by the table.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEventRow {
    pub key: String,
    pub event_type: String,
    pub payload: String,
    pub metadata: String,
    pub version: String,
    pub correlation_id: Option<String>,
}

/// Row as read back. Every column except the identifier may be missing; the
/// store decides which gaps are fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEventRow {
    pub id: i64,
    pub key: String,
    pub event_type: Option<String>,
    pub payload: Option<String>,
    pub metadata: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub correlation_id: Option<String>,
}

#[async_trait]
pub trait EventTable: Send {
    async fn insert(&mut self, config: &EventStoreConfiguration, row: NewEventRow) -> Result<()>;

    /// All rows for `key`, ascending by identifier.
    async fn select_by_key(
        &mut self,
        config: &EventStoreConfiguration,
        key: &str,
    ) -> Result<Vec<StoredEventRow>>;

    /// Give the underlying connection back. Must be idempotent.
    async fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// In-Memory Table
// ============================================================================

#[derive(Default)]
struct MemoryTables {
    next_id: i64,
    rows: HashMap<String, Vec<StoredEventRow>>,
}

/// Table backed by process memory. Clones share the same rows, so one clone
/// can be handed to a store while another inspects what was written.
#[derive(Clone, Default)]
pub struct InMemoryEventTable {
    tables: Arc<Mutex<MemoryTables>>,
    released: bool,
}

impl InMemoryEventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row of a table, by fully-qualified table name.
    pub async fn rows(&self, table_fqn: &str) -> Vec<StoredEventRow> {
        let tables = self.tables.lock().await;
        tables.rows.get(table_fqn).cloned().unwrap_or_default()
    }

    /// Insert a row verbatim, bypassing encoding. Useful for seeding legacy or
    /// damaged data.
    pub async fn insert_raw(&self, table_fqn: &str, mut row: StoredEventRow) -> i64 {
        let mut tables = self.tables.lock().await;
        tables.next_id += 1;
        row.id = tables.next_id;
        let id = row.id;
        tables.rows.entry(table_fqn.to_string()).or_default().push(row);
        id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(EventSourcingError::Disposed);
        }
        Ok(())
    }
}

#[async_trait]
impl EventTable for InMemoryEventTable {
    async fn insert(&mut self, config: &EventStoreConfiguration, row: NewEventRow) -> Result<()> {
        self.ensure_open()?;

        let stored = StoredEventRow {
            id: 0,
            key: row.key,
            event_type: Some(row.event_type),
            payload: Some(row.payload),
            metadata: Some(row.metadata),
            timestamp: Some(Utc::now()),
            version: Some(row.version),
            correlation_id: row.correlation_id,
        };
        self.insert_raw(&config.target_table_fqn(), stored).await;
        Ok(())
    }

    async fn select_by_key(
        &mut self,
        config: &EventStoreConfiguration,
        key: &str,
    ) -> Result<Vec<StoredEventRow>> {
        self.ensure_open()?;

        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .rows
            .get(&config.target_table_fqn())
            .map(|rows| rows.iter().filter(|row| row.key == key).cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }

    async fn release(&mut self) -> Result<()> {
        self.released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, event_type: &str) -> NewEventRow {
        NewEventRow {
            key: key.to_string(),
            event_type: event_type.to_string(),
            payload: "{}".to_string(),
            metadata: "{}".to_string(),
            version: "1.0".to_string(),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_rows_are_isolated_per_key_and_table() {
        let mut table = InMemoryEventTable::new();
        let events = EventStoreConfiguration::default();
        let audit = EventStoreConfiguration::default().with_table("audit");

        table.insert(&events, row("a", "First")).await.unwrap();
        table.insert(&events, row("b", "Other")).await.unwrap();
        table.insert(&audit, row("a", "Audit")).await.unwrap();
        table.insert(&events, row("a", "Second")).await.unwrap();

        let rows = table.select_by_key(&events, "a").await.unwrap();
        let types: Vec<_> = rows.iter().map(|r| r.event_type.as_deref().unwrap()).collect();
        assert_eq!(types, vec!["First", "Second"]);
        assert!(rows[0].id < rows[1].id);

        assert_eq!(table.select_by_key(&audit, "a").await.unwrap().len(), 1);
        assert!(table.select_by_key(&events, "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_rows() {
        let mut writer = InMemoryEventTable::new();
        let reader = writer.clone();
        let config = EventStoreConfiguration::default();

        writer.insert(&config, row("a", "First")).await.unwrap();

        let rows = reader.rows("event").await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_final() {
        let mut table = InMemoryEventTable::new();
        let config = EventStoreConfiguration::default();

        table.release().await.unwrap();
        table.release().await.unwrap();

        let err = table.insert(&config, row("a", "First")).await.unwrap_err();
        assert!(matches!(err, EventSourcingError::Disposed));
    }
}
