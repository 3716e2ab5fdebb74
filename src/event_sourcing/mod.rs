// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// core   - event/entity contracts and the versioned codec
// store  - flat append-only event store over a configurable table
// stream - stream repository (single, batch, unit of work) over a stream store
//
// ============================================================================

pub mod core;
pub mod store;
pub mod stream;

pub use self::core::*;
pub use store::*;
pub use stream::*;
