// ============================================================================
// Event Sourcing Store - Flat Event Log
// ============================================================================
//
// Append-only event rows per key under a configurable table schema. Works
// with any event type registered through a store kind.
//
// ============================================================================

pub mod config;
pub mod event_store;
pub mod postgres;
pub mod table;

pub use config::{
    quote_ident, EventSourcingBuilder, EventStoreConfiguration, EventStoreKind, SerializerOptions,
    StoreConfigurations,
};
pub use event_store::EventStore;
pub use postgres::{ensure_schema, DatabaseConfig, PgConnections, PgEventTable};
pub use table::{EventTable, InMemoryEventTable, NewEventRow, StoredEventRow};
