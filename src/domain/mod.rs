// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Aggregates persisted through the event sourcing infrastructure. Each one
// has its own subdirectory with value objects, events, commands, errors, the
// aggregate itself and a command handler.
//
// ============================================================================

pub mod order;
