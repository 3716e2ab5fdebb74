use super::event::Event;
use crate::error::{EventSourcingError, Result};

// ============================================================================
// Event Sources and Aggregates
// ============================================================================
//
// Key Principles:
// 1. State changes are recorded as pending events, never written directly
// 2. Only `flush` clears the pending buffer, and only after a commit
// 3. `version` counts every event ever committed for the entity
// 4. Loading folds the persisted stream back into state
//
// ============================================================================

/// Anything the stream repository can persist.
pub trait EventSource: Send {
    type Event: Event;

    /// Stream type recorded when the entity's stream is started.
    const STREAM_TYPE: &'static str;

    fn identity(&self) -> &str;

    /// Committed version (number of persisted events).
    fn version(&self) -> i64;

    /// True until the entity's stream has been started.
    fn is_new(&self) -> bool {
        self.version() == 0
    }

    fn pending_events(&self) -> &[Self::Event];

    /// Drop the pending buffer after a successful commit.
    fn flush(&mut self);
}

/// An event source that can be rebuilt from its stream.
pub trait Aggregate: EventSource + Sized {
    type Error: std::fmt::Display;

    /// Create the aggregate from the first event of its stream
    fn apply_first_event(id: &str, event: &Self::Event) -> Result<Self, Self::Error>;

    /// Apply subsequent events to update state
    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error>;

    /// Set the committed version after replay.
    fn restore_version(&mut self, version: i64);

    /// Fold `(version, event)` pairs into an aggregate; `None` for an empty history.
    fn load_from_history<I>(id: &str, history: I) -> Result<Option<Self>>
    where
        I: IntoIterator<Item = (i64, Self::Event)>,
    {
        let mut history = history.into_iter();
        let Some((first_version, first)) = history.next() else {
            return Ok(None);
        };

        let mut aggregate = Self::apply_first_event(id, &first).map_err(|e| {
            EventSourcingError::StreamStore(format!("Failed to apply first event of '{}': {}", id, e))
        })?;
        let mut version = first_version;

        for (event_version, event) in history {
            aggregate.apply_event(&event).map_err(|e| {
                EventSourcingError::StreamStore(format!(
                    "Failed to apply event {} of '{}': {}",
                    event_version, id, e
                ))
            })?;
            version = event_version;
        }

        aggregate.restore_version(version);
        Ok(Some(aggregate))
    }
}

/// Identity, committed version and pending buffer; embed it in an entity to get
/// the bookkeeping half of `EventSource` for free.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSourceState<E> {
    id: String,
    version: i64,
    pending: Vec<E>,
}

impl<E> EventSourceState<E> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn pending(&self) -> &[E] {
        &self.pending
    }

    pub fn record(&mut self, event: E) {
        self.pending.push(event);
    }

    /// Committed events advance the version.
    pub fn flush(&mut self) {
        self.version += self.pending.len() as i64;
        self.pending.clear();
    }

    pub fn restore_version(&mut self, version: i64) {
        self.version = version;
    }
}
