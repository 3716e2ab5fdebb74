use crate::utils::IsTransient;

// ============================================================================
// Event Sourcing Errors
// ============================================================================
//
// Every failure of the persistence core surfaces as one of these variants.
// Only publisher failures are swallowed (fire-and-forget); everything else is
// returned to the caller that triggered it.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EventSourcingError {
    /// A store kind was used before its configuration was registered.
    #[error("No event store configuration registered for {store}")]
    ConfigurationNotFound { store: &'static str },

    /// A connection selector names a pool that does not exist.
    #[error("No database connection registered under key '{key}'")]
    ConnectionNotFound { key: String },

    /// No codec is deployed for the persisted or requested record version.
    #[error("Event record version '{version}' is not supported")]
    UnsupportedRecordVersion { version: String },

    #[error("Event payload type '{type_name}' is not registered")]
    PayloadTypeNotFound { type_name: String },

    #[error("Could not read event payload of type '{type_name}': {reason}")]
    PayloadDecodeFailed { type_name: String, reason: String },

    /// A persisted row is missing its version, metadata, payload or timestamp.
    #[error("Malformed event record {record_id} for key '{key}': {reason}")]
    MalformedEventRecord {
        key: String,
        record_id: i64,
        reason: String,
    },

    /// Expected-version mismatch reported by the stream store.
    #[error("Concurrency conflict on stream '{stream_id}': expected version {expected}, but current is {actual}")]
    ConcurrencyConflict {
        stream_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("A persistence operation is already active and must be committed or aborted first")]
    PersistenceAlreadyActive,

    #[error("No persistence operation is active; begin one and stage entities before committing")]
    PersistenceNotActive,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("The underlying session has already been released")]
    Disposed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stream store error: {0}")]
    StreamStore(String),
}

pub type Result<T, E = EventSourcingError> = std::result::Result<T, E>;

impl EventSourcingError {
    pub fn malformed(key: &str, record_id: i64, reason: impl Into<String>) -> Self {
        Self::MalformedEventRecord {
            key: key.to_string(),
            record_id,
            reason: reason.into(),
        }
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl IsTransient for EventSourcingError {
    /// Conflicts are resolved by reloading and retrying; everything else is
    /// a programming, configuration or data-integrity error.
    fn is_transient(&self) -> bool {
        self.is_concurrency_conflict()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_transient() {
        let conflict = EventSourcingError::ConcurrencyConflict {
            stream_id: "O1".to_string(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_transient());
        assert!(!EventSourcingError::PersistenceNotActive.is_transient());
        assert!(!EventSourcingError::UnsupportedRecordVersion {
            version: "2.0".to_string()
        }
        .is_transient());
        assert!(!EventSourcingError::Cancelled.is_transient());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = EventSourcingError::malformed("O1", 7, "event metadata not found");
        assert_eq!(
            err.to_string(),
            "Malformed event record 7 for key 'O1': event metadata not found"
        );

        let err = EventSourcingError::ConfigurationNotFound { store: "OrderEvents" };
        assert!(err.to_string().contains("OrderEvents"));
    }
}
