use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::event::{Event, EventMetadata};
use crate::error::{EventSourcingError, Result};

// ============================================================================
// Versioned Event Codec
// ============================================================================
//
// Rows are decoded with the codec matching the version stored on the row,
// never the version the process currently writes. Keeping an old codec
// registered keeps every row written under it readable.
//
// ============================================================================

/// Version written by this build.
pub const CURRENT_RECORD_VERSION: &str = "1.0";

/// Every version `codec_for` can resolve.
pub const SUPPORTED_RECORD_VERSIONS: &[&str] = &["1.0"];

pub trait RecordCodec: Send + Sync {
    fn version(&self) -> &'static str;

    /// Build the metadata for an event with the given short name and tag.
    fn metadata_for(&self, event_type: &str, type_tag: &str) -> EventMetadata;

    /// `None` when the JSON is malformed or empty.
    fn decode_metadata(&self, json: &str) -> Option<EventMetadata>;

    /// Tag the payload registry is queried with.
    fn payload_tag<'m>(&self, metadata: &'m EventMetadata) -> &'m str;
}

impl dyn RecordCodec {
    pub fn encode<E: Event>(&self, event: &E) -> EventMetadata {
        self.metadata_for(event.event_type(), event.type_tag())
    }

    /// Decode an already-parsed payload through the decoder registered for
    /// the metadata's tag.
    pub fn decode_payload<E>(
        &self,
        payload: serde_json::Value,
        metadata: &EventMetadata,
        payloads: &PayloadRegistry<E>,
    ) -> Result<E> {
        let tag = self.payload_tag(metadata);
        let decoder = payloads
            .resolve(tag)
            .ok_or_else(|| EventSourcingError::PayloadTypeNotFound {
                type_name: tag.to_string(),
            })?;

        if payload.is_null() {
            return Err(EventSourcingError::PayloadDecodeFailed {
                type_name: tag.to_string(),
                reason: "payload is null".to_string(),
            });
        }

        decoder(payload).map_err(|e| EventSourcingError::PayloadDecodeFailed {
            type_name: tag.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Format 1.0: metadata is the camelCase JSON of `EventMetadata`, the payload
/// is resolved through `fullyQualifiedName`.
#[derive(Debug, Default)]
pub struct RecordCodecV1;

impl RecordCodec for RecordCodecV1 {
    fn version(&self) -> &'static str {
        "1.0"
    }

    fn metadata_for(&self, event_type: &str, type_tag: &str) -> EventMetadata {
        EventMetadata::new(self.version(), event_type, type_tag)
    }

    fn decode_metadata(&self, json: &str) -> Option<EventMetadata> {
        serde_json::from_str::<Option<EventMetadata>>(json).ok().flatten()
    }

    fn payload_tag<'m>(&self, metadata: &'m EventMetadata) -> &'m str {
        &metadata.fully_qualified_name
    }
}

static CODEC_V1: RecordCodecV1 = RecordCodecV1;

/// Resolve the codec for a persisted record version.
pub fn codec_for(version: &str) -> Result<&'static dyn RecordCodec> {
    match version {
        "1.0" => Ok(&CODEC_V1),
        other => Err(EventSourcingError::UnsupportedRecordVersion {
            version: other.to_string(),
        }),
    }
}

/// Codec used for every write.
pub fn current_codec() -> &'static dyn RecordCodec {
    &CODEC_V1
}

// ============================================================================
// Payload Registry
// ============================================================================

pub type PayloadDecoder<E> =
    Arc<dyn Fn(serde_json::Value) -> Result<E, serde_json::Error> + Send + Sync>;

/// Maps stable type tags to payload decoders. Populated at startup and then
/// shared read-only (usually behind an `Arc`).
pub struct PayloadRegistry<E> {
    decoders: HashMap<String, PayloadDecoder<E>>,
}

impl<E> PayloadRegistry<E> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a custom decoder, e.g. to upcast a legacy tag into a current event.
    pub fn register<F>(mut self, tag: impl Into<String>, decoder: F) -> Self
    where
        F: Fn(serde_json::Value) -> Result<E, serde_json::Error> + Send + Sync + 'static,
    {
        self.decoders.insert(tag.into(), Arc::new(decoder));
        self
    }

    pub fn resolve(&self, tag: &str) -> Option<&PayloadDecoder<E>> {
        self.decoders.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl<E: DeserializeOwned + 'static> PayloadRegistry<E> {
    /// Decode the tag with `E`'s own `Deserialize` impl.
    pub fn register_serde(self, tag: impl Into<String>) -> Self {
        self.register(tag, serde_json::from_value::<E>)
    }

    pub fn register_all_serde<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tags.into_iter().fold(self, |registry, tag| registry.register_serde(tag))
    }
}

impl<E> Default for PayloadRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for PayloadRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().collect();
        tags.sort();
        f.debug_struct("PayloadRegistry").field("tags", &tags).finish()
    }
}
