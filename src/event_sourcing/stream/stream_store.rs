use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::core::{Aggregate, Event};

// ============================================================================
// Stream Store - transactional per-stream persistence
// ============================================================================
//
// The repository stages stream starts and appends against a session and then
// commits them together with `save_changes`. Expected-version checks belong
// to the store; their failures come back as `ConcurrencyConflict`.
//
// ============================================================================

/// Version range and point-in-time filters for replay. All optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamQuery {
    /// First version to include (1-based)
    pub from_version: Option<i64>,
    /// Last version to include
    pub to_version: Option<i64>,
    /// Only events committed at or before this instant
    pub as_of: Option<DateTime<Utc>>,
}

impl StreamQuery {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn from_version(mut self, version: i64) -> Self {
        self.from_version = Some(version);
        self
    }

    pub fn to_version(mut self, version: i64) -> Self {
        self.to_version = Some(version);
        self
    }

    pub fn as_of(mut self, instant: DateTime<Utc>) -> Self {
        self.as_of = Some(instant);
        self
    }

    pub fn includes(&self, version: i64, committed_at: DateTime<Utc>) -> bool {
        self.from_version.map_or(true, |from| version >= from)
            && self.to_version.map_or(true, |to| version <= to)
            && self.as_of.map_or(true, |as_of| committed_at <= as_of)
    }
}

#[async_trait]
pub trait StreamStore: Send {
    type Event: Event;

    /// Stage the creation of stream `id` holding `events`.
    async fn start_stream(&mut self, stream_type: &str, id: &str, events: Vec<Self::Event>) -> Result<()>;

    /// Stage `events` onto stream `id`, which must be at `expected_version`.
    async fn append(&mut self, id: &str, expected_version: i64, events: Vec<Self::Event>) -> Result<()>;

    /// Replay stream `id` into an aggregate; `None` when nothing matches.
    async fn aggregate_stream<A>(&mut self, id: &str, query: StreamQuery) -> Result<Option<A>>
    where
        A: Aggregate<Event = Self::Event>;

    /// Commit everything staged in this session as one transaction.
    async fn save_changes(&mut self) -> Result<()>;

    /// Drop everything staged since the last commit.
    async fn discard_changes(&mut self) -> Result<()>;

    /// Release the session. Must be idempotent.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// In-Memory Stream Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct CommittedEvent<E> {
    pub version: i64,
    pub committed_at: DateTime<Utc>,
    pub event: E,
}

#[derive(Debug, Clone)]
pub struct StoredStream<E> {
    pub stream_type: String,
    pub events: Vec<CommittedEvent<E>>,
}

#[derive(Debug, Clone)]
enum StagedOperation<E> {
    Start {
        stream_type: String,
        id: String,
        events: Vec<E>,
    },
    Append {
        id: String,
        expected_version: i64,
        events: Vec<E>,
    },
}

type Streams<E> = HashMap<String, StoredStream<E>>;

/// Sessions over a shared in-memory "database". Each clone is its own session
/// with its own staged operations; committed streams are shared.
pub struct InMemoryStreamStore<E> {
    streams: Arc<Mutex<Streams<E>>>,
    staged: Vec<StagedOperation<E>>,
    closed: bool,
}

impl<E> InMemoryStreamStore<E> {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            staged: Vec::new(),
            closed: false,
        }
    }

    /// Another session over the same committed streams.
    pub fn session(&self) -> Self {
        Self {
            streams: self.streams.clone(),
            staged: Vec::new(),
            closed: false,
        }
    }

    pub fn staged_operations(&self) -> usize {
        self.staged.len()
    }

    pub async fn stream_version(&self, id: &str) -> i64 {
        let streams = self.streams.lock().await;
        streams.get(id).map_or(0, |stream| stream.events.len() as i64)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(EventSourcingError::Disposed);
        }
        Ok(())
    }
}

impl<E: Clone> InMemoryStreamStore<E> {
    pub async fn stream(&self, id: &str) -> Option<StoredStream<E>> {
        self.streams.lock().await.get(id).cloned()
    }
}

impl<E> Default for InMemoryStreamStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_operation<E>(streams: &mut Streams<E>, operation: StagedOperation<E>, now: DateTime<Utc>) -> Result<()> {
    let (id, base_version, events) = match operation {
        StagedOperation::Start { stream_type, id, events } => {
            if let Some(existing) = streams.get(&id) {
                return Err(EventSourcingError::ConcurrencyConflict {
                    stream_id: id,
                    expected: 0,
                    actual: existing.events.len() as i64,
                });
            }
            streams.insert(id.clone(), StoredStream { stream_type, events: Vec::new() });
            (id, 0, events)
        }
        StagedOperation::Append { id, expected_version, events } => {
            let actual = streams.get(&id).map_or(0, |stream| stream.events.len() as i64);
            if actual != expected_version || actual == 0 {
                return Err(EventSourcingError::ConcurrencyConflict {
                    stream_id: id,
                    expected: expected_version,
                    actual,
                });
            }
            (id, expected_version, events)
        }
    };

    if let Some(stream) = streams.get_mut(&id) {
        for (offset, event) in events.into_iter().enumerate() {
            stream.events.push(CommittedEvent {
                version: base_version + offset as i64 + 1,
                committed_at: now,
                event,
            });
        }
    }
    Ok(())
}

#[async_trait]
impl<E: Event> StreamStore for InMemoryStreamStore<E> {
    type Event = E;

    async fn start_stream(&mut self, stream_type: &str, id: &str, events: Vec<E>) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!(stream_type = %stream_type, stream_id = %id, event_count = events.len(), "Staged stream start");
        self.staged.push(StagedOperation::Start {
            stream_type: stream_type.to_string(),
            id: id.to_string(),
            events,
        });
        Ok(())
    }

    async fn append(&mut self, id: &str, expected_version: i64, events: Vec<E>) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!(stream_id = %id, expected_version, event_count = events.len(), "Staged append");
        self.staged.push(StagedOperation::Append {
            id: id.to_string(),
            expected_version,
            events,
        });
        Ok(())
    }

    async fn aggregate_stream<A>(&mut self, id: &str, query: StreamQuery) -> Result<Option<A>>
    where
        A: Aggregate<Event = E>,
    {
        self.ensure_open()?;
        let history: Vec<(i64, E)> = {
            let streams = self.streams.lock().await;
            match streams.get(id) {
                Some(stream) => stream
                    .events
                    .iter()
                    .filter(|committed| query.includes(committed.version, committed.committed_at))
                    .map(|committed| (committed.version, committed.event.clone()))
                    .collect(),
                None => return Ok(None),
            }
        };

        A::load_from_history(id, history)
    }

    /// All-or-nothing: operations are applied to a copy of the touched
    /// streams and written back only if every one of them succeeds.
    async fn save_changes(&mut self) -> Result<()> {
        self.ensure_open()?;
        let staged = std::mem::take(&mut self.staged);
        if staged.is_empty() {
            return Ok(());
        }

        let mut streams = self.streams.lock().await;
        let mut working: Streams<E> = HashMap::new();
        for operation in &staged {
            let id = match operation {
                StagedOperation::Start { id, .. } | StagedOperation::Append { id, .. } => id,
            };
            if let Some(stream) = streams.get(id) {
                working.entry(id.clone()).or_insert_with(|| stream.clone());
            }
        }

        let now = Utc::now();
        let operation_count = staged.len();
        for operation in staged {
            apply_operation(&mut working, operation, now)?;
        }

        streams.extend(working);
        tracing::debug!(operation_count, "Committed staged stream operations");
        Ok(())
    }

    async fn discard_changes(&mut self) -> Result<()> {
        if !self.staged.is_empty() {
            tracing::debug!(operation_count = self.staged.len(), "Discarded staged stream operations");
        }
        self.staged.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.staged.clear();
        self.closed = true;
        Ok(())
    }
}
