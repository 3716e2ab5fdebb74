// ============================================================================
// Event Sourcing Core - Generic Abstractions
// ============================================================================
//
// Event and entity contracts plus the versioned record codec. Nothing in
// here knows about a particular aggregate or storage backend.
//
// ============================================================================

pub mod aggregate;
pub mod codec;
pub mod event;

// Re-export core types for convenience
pub use aggregate::{Aggregate, EventSource, EventSourceState};
pub use codec::{
    codec_for, current_codec, PayloadDecoder, PayloadRegistry, RecordCodec, RecordCodecV1,
    CURRENT_RECORD_VERSION, SUPPORTED_RECORD_VERSIONS,
};
pub use event::{sort_chronologically, Event, EventMetadata, EventRecord};
