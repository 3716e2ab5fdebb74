// ============================================================================
// Event Sourcing Stream - Entity Streams and Unit of Work
// ============================================================================
//
// Persists event-sourced entities through a transactional stream store:
// single-entity and batch stores, deferred (unit-of-work) commits, and the
// post-commit publish.
//
// ============================================================================

pub mod publisher;
pub mod repository;
pub mod stream_store;

pub use publisher::{ChannelPublisher, EventPublisher, NoopPublisher, PublishedEvent};
pub use repository::StreamRepository;
pub use stream_store::{CommittedEvent, InMemoryStreamStore, StoredStream, StreamQuery, StreamStore};
