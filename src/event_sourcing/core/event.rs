use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

// ============================================================================
// Events, Metadata and Records
// ============================================================================
//
// An event is an immutable fact. Its durable form is a (payload, metadata)
// pair; the metadata names the codec version and the stable type tag used to
// pick a payload decoder when the row is read back.
//
// ============================================================================

/// Domain event contract.
///
/// `event_type` is the short name written to the type column, `type_tag` is the
/// stable identifier the payload registry resolves on read. They coincide
/// unless an event keeps decoding under a tag that differs from its display name.
pub trait Event: Serialize + Clone + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    fn type_tag(&self) -> &'static str {
        self.event_type()
    }

    /// Origination time, used to order events across entities.
    fn initiation_instant(&self) -> DateTime<Utc>;
}

/// Metadata persisted next to every payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub version: String,
    pub event_type: String,
    pub fully_qualified_name: String,
}

impl EventMetadata {
    pub fn new(
        version: impl Into<String>,
        event_type: impl Into<String>,
        fully_qualified_name: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            event_type: event_type.into(),
            fully_qualified_name: fully_qualified_name.into(),
        }
    }
}

/// One decoded row of the flat event store.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord<E> {
    /// Store-assigned, monotonically increasing; replay order within a key.
    pub id: i64,
    pub key: String,
    pub event_type: String,
    pub payload: E,
    pub metadata: EventMetadata,
    pub timestamp: DateTime<Utc>,
    /// Codec version the row was written with.
    pub version: String,
    pub correlation_id: Option<String>,
}

/// Stable sort of events by origination time. Ties keep their input order.
pub fn sort_chronologically<T, E: Event>(entries: &mut [T], event_of: impl Fn(&T) -> &E) {
    entries.sort_by_key(|entry| event_of(entry).initiation_instant());
}
