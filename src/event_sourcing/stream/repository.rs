use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::publisher::{EventPublisher, NoopPublisher, PublishedEvent};
use super::stream_store::{StreamQuery, StreamStore};
use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::core::{sort_chronologically, Aggregate, EventSource};
use crate::metrics::{CommitMode, PersistenceMetrics};
use crate::utils::cancellable;

// ============================================================================
// Stream Repository - persists event-sourced entities
// ============================================================================
//
// Type Parameters:
// - `S`: stream store session doing the per-stream writes and the commit
// - `A`: entity type; its pending events are what gets persisted
//
// Write Flow:
// 1. Stage a stream start (new entity) or an append at the expected version
// 2. Commit the session once
// 3. Hand the committed events to the publisher, fire-and-forget
// 4. Flush the entities' pending buffers
//
// Steps 3 and 4 only run after a successful commit. A failed commit leaves
// every entity with its pending events untouched.
//
// Store I/O accepts a cancellation signal per call (`*_with_cancellation`);
// the plain forms are never cancelled. A cancelled call discards the
// session's staged writes and leaves the repository usable.
//
// Modes:
// - Idle      - `store` / `store_all` commit immediately
// - Deferring - between `begin` and `commit`; `stage` writes without
//               committing and the repository holds the entities until then
//
// One repository owns one session and is not meant to be shared between
// concurrent callers.
//
// ============================================================================

enum PersistenceMode<A> {
    Idle,
    Deferring {
        staged: Vec<A>,
        /// False once the session's staged writes were discarded after a
        /// failure; the next commit writes them again.
        written: bool,
    },
}

pub struct StreamRepository<S, A>
where
    S: StreamStore,
    A: EventSource<Event = S::Event>,
{
    store: S,
    publisher: Arc<dyn EventPublisher<S::Event>>,
    mode: PersistenceMode<A>,
    metrics: Option<Arc<PersistenceMetrics>>,
    closed: bool,
}

impl<S, A> StreamRepository<S, A>
where
    S: StreamStore,
    A: EventSource<Event = S::Event>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            publisher: Arc::new(NoopPublisher),
            mode: PersistenceMode::Idle,
            metrics: None,
            closed: false,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher<S::Event>>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PersistenceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_deferring(&self) -> bool {
        matches!(self.mode, PersistenceMode::Deferring { .. })
    }

    /// Entities waiting for the deferred commit.
    pub fn staged_count(&self) -> usize {
        match &self.mode {
            PersistenceMode::Deferring { staged, .. } => staged.len(),
            PersistenceMode::Idle => 0,
        }
    }

    /// Persist one entity's pending events and commit.
    ///
    /// A new entity gets its stream started; an existing one is appended to
    /// at its current version, so a stale entity surfaces the store's
    /// `ConcurrencyConflict`. Nothing pending means nothing to do.
    pub async fn store(&mut self, entity: &mut A) -> Result<()> {
        self.store_with_cancellation(entity, &CancellationToken::new()).await
    }

    pub async fn store_with_cancellation(
        &mut self,
        entity: &mut A,
        token: &CancellationToken,
    ) -> Result<()> {
        self.ensure_idle()?;

        let events: Vec<_> = entity
            .pending_events()
            .iter()
            .map(|event| PublishedEvent::new(entity.identity(), event.clone()))
            .collect();
        if events.is_empty() {
            tracing::debug!(stream_id = %entity.identity(), "No pending events to store");
            return Ok(());
        }

        if let Err(error) = write_pending(&mut self.store, token, &*entity).await {
            discard_session(&mut self.store).await;
            return Err(error);
        }
        commit_session(&mut self.store, token).await?;

        let event_count = events.len();
        self.record_commit(CommitMode::Single, event_count);
        self.publish(events);
        entity.flush();

        tracing::info!(
            stream_id = %entity.identity(),
            event_count,
            version = entity.version(),
            "Stored entity"
        );
        Ok(())
    }

    /// Persist the pending events of several entities in one commit.
    ///
    /// Events are written one by one in origination order across all
    /// entities. A new entity's stream is started by its earliest event and
    /// appended to for the rest; the expected version of each append counts
    /// the entity's events already written in this call.
    pub async fn store_all(&mut self, entities: &mut [A]) -> Result<()> {
        self.store_all_with_cancellation(entities, &CancellationToken::new()).await
    }

    pub async fn store_all_with_cancellation(
        &mut self,
        entities: &mut [A],
        token: &CancellationToken,
    ) -> Result<()> {
        self.ensure_idle()?;

        let mut pending: Vec<(usize, S::Event)> = entities
            .iter()
            .enumerate()
            .flat_map(|(index, entity)| {
                entity
                    .pending_events()
                    .iter()
                    .cloned()
                    .map(move |event| (index, event))
            })
            .collect();
        if pending.is_empty() {
            tracing::debug!(entity_count = entities.len(), "No pending events in batch");
            return Ok(());
        }
        sort_chronologically(&mut pending, |(_, event)| event);

        let mut started = vec![false; entities.len()];
        let mut written = vec![0i64; entities.len()];

        for (index, event) in &pending {
            let entity = &entities[*index];
            let outcome = if entity.is_new() && !started[*index] {
                started[*index] = true;
                cancellable(
                    token,
                    self.store
                        .start_stream(A::STREAM_TYPE, entity.identity(), vec![event.clone()]),
                )
                .await
            } else {
                let expected_version = entity.version() + written[*index];
                cancellable(
                    token,
                    self.store
                        .append(entity.identity(), expected_version, vec![event.clone()]),
                )
                .await
            };

            if let Err(error) = outcome {
                discard_session(&mut self.store).await;
                return Err(error);
            }
            written[*index] += 1;
        }

        commit_session(&mut self.store, token).await?;

        let event_count = pending.len();
        self.record_commit(CommitMode::Batch, event_count);
        self.publish(
            pending
                .into_iter()
                .map(|(index, event)| PublishedEvent::new(entities[index].identity(), event))
                .collect(),
        );
        for entity in entities.iter_mut() {
            entity.flush();
        }

        tracing::info!(
            entity_count = entities.len(),
            event_count,
            "Stored entity batch"
        );
        Ok(())
    }

    /// Start a deferred batch.
    pub fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.is_deferring() {
            return Err(EventSourcingError::PersistenceAlreadyActive);
        }

        self.mode = PersistenceMode::Deferring {
            staged: Vec::new(),
            written: true,
        };
        tracing::debug!("Deferred persistence started");
        Ok(())
    }

    /// Write an entity's pending events into the open deferred batch without
    /// committing. The repository keeps the entity until `commit` or `abort`
    /// hands it back.
    ///
    /// If the write fails the session's staged writes are discarded and the
    /// entity is kept anyway; the next `commit` writes the whole batch again.
    pub async fn stage(&mut self, entity: A) -> Result<()> {
        self.stage_with_cancellation(entity, &CancellationToken::new()).await
    }

    pub async fn stage_with_cancellation(&mut self, entity: A, token: &CancellationToken) -> Result<()> {
        self.ensure_open()?;
        let PersistenceMode::Deferring { staged, written } = &mut self.mode else {
            return Err(EventSourcingError::PersistenceNotActive);
        };

        let outcome = if *written {
            write_pending(&mut self.store, token, &entity).await
        } else {
            Ok(0)
        };

        tracing::debug!(
            stream_id = %entity.identity(),
            pending = entity.pending_events().len(),
            "Staged entity"
        );
        staged.push(entity);

        if let Err(error) = outcome {
            *written = false;
            discard_session(&mut self.store).await;
            return Err(error);
        }
        Ok(())
    }

    /// Commit the deferred batch once, publish its events in origination
    /// order across entities, and return the staged entities flushed.
    ///
    /// An empty batch goes back to Idle without touching the store. On a
    /// failed commit the batch stays open with its entities unflushed; call
    /// `commit` again or `abort`.
    pub async fn commit(&mut self) -> Result<Vec<A>> {
        self.commit_with_cancellation(&CancellationToken::new()).await
    }

    pub async fn commit_with_cancellation(&mut self, token: &CancellationToken) -> Result<Vec<A>> {
        self.ensure_open()?;
        let PersistenceMode::Deferring { staged, written } = &mut self.mode else {
            return Err(EventSourcingError::PersistenceNotActive);
        };

        let mut events: Vec<PublishedEvent<S::Event>> = staged
            .iter()
            .flat_map(|entity| {
                entity
                    .pending_events()
                    .iter()
                    .map(move |event| PublishedEvent::new(entity.identity(), event.clone()))
            })
            .collect();
        if events.is_empty() {
            let entities = std::mem::take(staged);
            self.mode = PersistenceMode::Idle;
            tracing::debug!("Deferred batch empty, nothing to commit");
            return Ok(entities);
        }

        if !*written {
            for entity in staged.iter() {
                if let Err(error) = write_pending(&mut self.store, token, entity).await {
                    discard_session(&mut self.store).await;
                    return Err(error);
                }
            }
            *written = true;
        }

        if let Err(error) = commit_session(&mut self.store, token).await {
            *written = false;
            return Err(error);
        }

        let mut entities = std::mem::take(staged);
        self.mode = PersistenceMode::Idle;

        sort_chronologically(&mut events, |published| &published.event);
        let event_count = events.len();
        self.record_commit(CommitMode::Deferred, event_count);
        self.publish(events);
        for entity in entities.iter_mut() {
            entity.flush();
        }

        tracing::info!(
            entity_count = entities.len(),
            event_count,
            "Committed deferred batch"
        );
        Ok(entities)
    }

    /// Drop the deferred batch: staged writes are discarded and the entities
    /// are handed back with their pending events intact.
    pub async fn abort(&mut self) -> Result<Vec<A>> {
        self.ensure_open()?;
        if !self.is_deferring() {
            return Err(EventSourcingError::PersistenceNotActive);
        }

        self.store.discard_changes().await?;
        let entities = match std::mem::replace(&mut self.mode, PersistenceMode::Idle) {
            PersistenceMode::Deferring { staged, .. } => staged,
            PersistenceMode::Idle => Vec::new(),
        };

        tracing::debug!(entity_count = entities.len(), "Deferred batch aborted");
        Ok(entities)
    }

    /// Release the stream store session. Safe to call more than once; an
    /// open deferred batch is discarded.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let PersistenceMode::Deferring { staged, .. } = &self.mode {
            if !staged.is_empty() {
                tracing::warn!(
                    entity_count = staged.len(),
                    "Closing repository with an uncommitted deferred batch"
                );
            }
        }
        self.mode = PersistenceMode::Idle;
        self.store.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(EventSourcingError::Disposed);
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        self.ensure_open()?;
        if self.is_deferring() {
            return Err(EventSourcingError::PersistenceAlreadyActive);
        }
        Ok(())
    }

    fn record_commit(&self, mode: CommitMode, event_count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_commit(mode, event_count);
        }
    }

    fn publish(&self, events: Vec<PublishedEvent<S::Event>>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_published(events.len());
        }
        self.publisher.publish_and_forget(events);
    }
}

impl<S, A> StreamRepository<S, A>
where
    S: StreamStore,
    A: EventSource<Event = S::Event> + Aggregate,
{
    pub async fn load(&mut self, id: &str) -> Result<Option<A>> {
        self.load_with(id, StreamQuery::latest(), |_| {}).await
    }

    /// Replay `id` within `query`'s bounds and run `configure` on the result.
    pub async fn load_with<F>(&mut self, id: &str, query: StreamQuery, configure: F) -> Result<Option<A>>
    where
        F: FnOnce(&mut A),
    {
        self.load_with_cancellation(id, query, configure, &CancellationToken::new())
            .await
    }

    pub async fn load_with_cancellation<F>(
        &mut self,
        id: &str,
        query: StreamQuery,
        configure: F,
        token: &CancellationToken,
    ) -> Result<Option<A>>
    where
        F: FnOnce(&mut A),
    {
        self.ensure_open()?;

        let loaded: Option<A> = cancellable(token, self.store.aggregate_stream(id, query)).await?;
        let Some(mut entity) = loaded else {
            tracing::debug!(stream_id = %id, "Stream not found");
            return Ok(None);
        };

        configure(&mut entity);
        tracing::debug!(stream_id = %id, version = entity.version(), "Loaded entity");
        Ok(Some(entity))
    }
}

/// Stage a start or an append for everything `entity` has pending.
async fn write_pending<S, A>(store: &mut S, token: &CancellationToken, entity: &A) -> Result<usize>
where
    S: StreamStore,
    A: EventSource<Event = S::Event>,
{
    let events = entity.pending_events().to_vec();
    let event_count = events.len();
    if event_count == 0 {
        return Ok(0);
    }

    if entity.is_new() {
        cancellable(token, store.start_stream(A::STREAM_TYPE, entity.identity(), events)).await?;
    } else {
        cancellable(token, store.append(entity.identity(), entity.version(), events)).await?;
    }
    Ok(event_count)
}

async fn commit_session<S: StreamStore>(store: &mut S, token: &CancellationToken) -> Result<()> {
    match cancellable(token, store.save_changes()).await {
        Ok(()) => Ok(()),
        Err(error) => {
            tracing::error!(error = %error, "Commit failed");
            discard_session(store).await;
            Err(error)
        }
    }
}

async fn discard_session<S: StreamStore>(store: &mut S) {
    if let Err(error) = store.discard_changes().await {
        tracing::warn!(error = %error, "Failed to discard staged stream changes");
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
