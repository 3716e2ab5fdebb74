use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::marker::PhantomData;
use std::time::Duration;

use crate::event_sourcing::core::Event;
use crate::event_sourcing::stream::{EventPublisher, PublishedEvent};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

// ============================================================================
// Redpanda Publisher
// ============================================================================
//
// Sends committed events to a topic from a background task, keyed by stream
// identifier so one stream's events share a partition. Delivery errors
// and an open circuit are logged and dropped; the committing caller never
// waits on the broker.
//
// ============================================================================

pub struct RedpandaPublisher<E> {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    topic: String,
    _events: PhantomData<fn(E)>,
}

impl<E: Event> RedpandaPublisher<E> {
    pub fn new(brokers: &str, topic: impl Into<String>) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 5,
                open_for: Duration::from_secs(30),
                success_threshold: 3,
            }),
            topic: topic.into(),
            _events: PhantomData,
        })
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }

    pub async fn reset_circuit_breaker(&self) {
        self.circuit_breaker.reset().await;
    }
}

impl<E: Event> EventPublisher<E> for RedpandaPublisher<E> {
    fn publish_and_forget(&self, events: Vec<PublishedEvent<E>>) {
        let messages: Vec<(String, String)> = events
            .into_iter()
            .filter_map(|published| match serde_json::to_string(&published.event) {
                Ok(payload) => Some((published.stream_id, payload)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        stream_id = %published.stream_id,
                        event_type = published.event.event_type(),
                        "Skipping unserializable event"
                    );
                    None
                }
            })
            .collect();
        if messages.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event_count = messages.len(), "No runtime to publish on, dropping events");
            return;
        };

        let producer = self.producer.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let topic = self.topic.clone();

        runtime.spawn(async move {
            for (key, payload) in messages {
                let result = circuit_breaker
                    .call(async {
                        let record = FutureRecord::to(&topic).key(&key).payload(&payload);
                        producer
                            .send(record, Timeout::After(Duration::from_secs(5)))
                            .await
                            .map_err(|(e, _)| e)
                    })
                    .await;

                match result {
                    Ok(_) => tracing::debug!(topic = %topic, key = %key, "Published to Redpanda"),
                    Err(CircuitBreakerError::CircuitOpen) => {
                        tracing::warn!(topic = %topic, "Circuit breaker open - dropping remaining events");
                        break;
                    }
                    Err(CircuitBreakerError::OperationFailed(e)) => {
                        tracing::warn!(error = %e, topic = %topic, key = %key, "Failed to publish to Redpanda");
                    }
                }
            }
        });
    }
}
