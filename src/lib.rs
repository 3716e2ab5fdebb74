// ============================================================================
// SQL Event Sourcing
// ============================================================================
//
// event_sourcing - codec, flat event store, stream repository
// domain         - order aggregate built on top of it
// metrics        - Prometheus counters for saves, loads and commits
// messaging      - broker publishers (feature `redpanda`)
// utils          - retry, circuit breaker, cancellation
//
// ============================================================================

pub mod domain;
pub mod error;
pub mod event_sourcing;
pub mod messaging;
pub mod metrics;
pub mod utils;

pub use error::{EventSourcingError, Result};
