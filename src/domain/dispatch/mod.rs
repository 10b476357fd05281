// ============================================================================
// Dispatch Domain - Order dispatch workflow
// ============================================================================
//
// This module contains ALL dispatch-specific code:
// - Events (OrderCreated in, DispatchPreparing/OrderDispatched/DispatchCompleted out)
// - Errors (DispatchError, FailureKind, InboundError)
// - Identity (ApplicationIdentity stamped on OrderDispatched)
// - Service (DispatchService, the availability check + emission sequence)
//
// ============================================================================

pub mod events;
pub mod errors;
pub mod identity;
pub mod service;

// Re-export for convenience
pub use events::*;
pub use errors::*;
pub use identity::*;
pub use service::*;
