use serde::{Deserialize, Serialize};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EventSourcingError, Result};

// ============================================================================
// Event Store Configuration
// ============================================================================
//
// Each store kind maps to a table description. Configurations are registered
// once through `EventSourcingBuilder`; the resulting `StoreConfigurations` is
// immutable and shared by every store instance, so lookups need no locking.
//
// ============================================================================

/// JSON options applied to payload and metadata columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializerOptions {
    pub pretty: bool,
}

impl SerializerOptions {
    pub fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStoreConfiguration {
    /// Selects a named pool in `PgConnections`; `None` uses the default pool.
    pub connection_key: Option<String>,
    pub target_schema: Option<String>,
    pub target_table: String,
    pub id_column: String,
    pub key_column: String,
    pub type_column: String,
    pub payload_column: String,
    pub metadata_column: String,
    pub timestamp_column: String,
    pub version_column: String,
    pub correlation_id_column: String,
    pub serializer: SerializerOptions,
}

impl Default for EventStoreConfiguration {
    fn default() -> Self {
        Self {
            connection_key: None,
            target_schema: None,
            target_table: "event".to_string(),
            id_column: "id".to_string(),
            key_column: "key".to_string(),
            type_column: "type".to_string(),
            payload_column: "payload".to_string(),
            metadata_column: "metadata".to_string(),
            timestamp_column: "timestamp".to_string(),
            version_column: "version".to_string(),
            correlation_id_column: "correlationId".to_string(),
            serializer: SerializerOptions::default(),
        }
    }
}

impl EventStoreConfiguration {
    pub fn with_connection_key(mut self, key: impl Into<String>) -> Self {
        self.connection_key = Some(key.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.target_schema = Some(schema.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.target_table = table.into();
        self
    }

    /// `schema.table`, or just `table` without a schema.
    pub fn target_table_fqn(&self) -> String {
        match &self.target_schema {
            Some(schema) => format!("{}.{}", schema, self.target_table),
            None => self.target_table.clone(),
        }
    }

    /// Quoted form of `target_table_fqn` for SQL text.
    pub fn qualified_table(&self) -> String {
        match &self.target_schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.target_table)),
            None => quote_ident(&self.target_table),
        }
    }

    /// Quoted column list in the logical order id, key, type, payload,
    /// metadata, timestamp, version, correlation id.
    pub fn quoted_columns(&self) -> [String; 8] {
        [
            quote_ident(&self.id_column),
            quote_ident(&self.key_column),
            quote_ident(&self.type_column),
            quote_ident(&self.payload_column),
            quote_ident(&self.metadata_column),
            quote_ident(&self.timestamp_column),
            quote_ident(&self.version_column),
            quote_ident(&self.correlation_id_column),
        ]
    }
}

/// Double-quote an SQL identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Marker for a logical event store; its type identifies the configuration.
pub trait EventStoreKind: Send + Sync + 'static {
    type Event: crate::event_sourcing::core::Event;
}

#[derive(Debug)]
struct RegisteredConfiguration {
    store: &'static str,
    configuration: Arc<EventStoreConfiguration>,
}

/// Read-only registry of store configurations keyed by store kind.
#[derive(Debug, Default)]
pub struct StoreConfigurations {
    entries: HashMap<TypeId, RegisteredConfiguration>,
}

impl StoreConfigurations {
    pub fn builder() -> EventSourcingBuilder {
        EventSourcingBuilder::new()
    }

    pub fn get<K: 'static>(&self) -> Result<Arc<EventStoreConfiguration>> {
        self.entries
            .get(&TypeId::of::<K>())
            .map(|entry| entry.configuration.clone())
            .ok_or(EventSourcingError::ConfigurationNotFound {
                store: short_type_name::<K>(),
            })
    }

    pub fn is_registered<K: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<K>())
    }

    pub fn registered_stores(&self) -> Vec<&'static str> {
        let mut stores: Vec<_> = self.entries.values().map(|entry| entry.store).collect();
        stores.sort_unstable();
        stores
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Startup-time registration of store configurations.
#[derive(Debug, Default)]
pub struct EventSourcingBuilder {
    defaults: EventStoreConfiguration,
    entries: HashMap<TypeId, RegisteredConfiguration>,
}

impl EventSourcingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration every registration starts from.
    pub fn with_defaults(mut self, defaults: EventStoreConfiguration) -> Self {
        self.defaults = defaults;
        self
    }

    /// Register store kind `K` with a copy of the defaults adjusted by `configure`.
    /// Registering a kind twice keeps the last configuration.
    pub fn use_event_store<K: EventStoreKind>(
        mut self,
        configure: impl FnOnce(&mut EventStoreConfiguration),
    ) -> Self {
        let mut configuration = self.defaults.clone();
        configure(&mut configuration);

        tracing::debug!(
            store = short_type_name::<K>(),
            table = %configuration.target_table_fqn(),
            "Registered event store configuration"
        );

        self.entries.insert(
            TypeId::of::<K>(),
            RegisteredConfiguration {
                store: short_type_name::<K>(),
                configuration: Arc::new(configuration),
            },
        );
        self
    }

    pub fn build(self) -> Arc<StoreConfigurations> {
        Arc::new(StoreConfigurations {
            entries: self.entries,
        })
    }
}

pub(crate) fn short_type_name<K>() -> &'static str {
    let full = type_name::<K>();
    full.rsplit("::").next().unwrap_or(full)
}
