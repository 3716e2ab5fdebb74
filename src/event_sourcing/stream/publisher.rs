use tokio::sync::mpsc;

use crate::event_sourcing::core::Event;

/// A committed event with the identifier of the stream it was appended to.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent<E> {
    pub stream_id: String,
    pub event: E,
}

impl<E> PublishedEvent<E> {
    pub fn new(stream_id: impl Into<String>, event: E) -> Self {
        Self {
            stream_id: stream_id.into(),
            event,
        }
    }
}

/// Post-commit notification of committed events.
///
/// Implementations must return promptly and must not fail the caller; any
/// delivery error is theirs to log.
pub trait EventPublisher<E: Event>: Send + Sync {
    fn publish_and_forget(&self, events: Vec<PublishedEvent<E>>);
}

/// Publisher for repositories nobody listens to.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl<E: Event> EventPublisher<E> for NoopPublisher {
    fn publish_and_forget(&self, _events: Vec<PublishedEvent<E>>) {}
}

/// Hands each published batch to an in-process consumer.
#[derive(Debug, Clone)]
pub struct ChannelPublisher<E> {
    sender: mpsc::UnboundedSender<Vec<PublishedEvent<E>>>,
}

impl<E> ChannelPublisher<E> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<PublishedEvent<E>>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl<E: Event> EventPublisher<E> for ChannelPublisher<E> {
    fn publish_and_forget(&self, events: Vec<PublishedEvent<E>>) {
        let event_count = events.len();
        if self.sender.send(events).is_err() {
            tracing::warn!(event_count, "Event consumer has gone away, dropping published events");
        }
    }
}
