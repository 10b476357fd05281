// ============================================================================
// order_dispatch
// ============================================================================
//
// Consumes OrderCreated, checks stock, emits DispatchPreparing,
// OrderDispatched and DispatchCompleted. Failures are classified as
// retryable (redelivered) or not retryable (dead-lettered).
//
// ============================================================================

pub mod clients;
pub mod config;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod utils;
