// ============================================================================
// Messaging - external event publishers
// ============================================================================

#[cfg(feature = "redpanda")]
pub mod redpanda;

#[cfg(feature = "redpanda")]
pub use redpanda::RedpandaPublisher;
