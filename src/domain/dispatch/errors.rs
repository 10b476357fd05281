use std::fmt;
use uuid::Uuid;

use crate::clients::StockCheckError;
use crate::messaging::PublishError;
use crate::utils::IsTransient;

use super::service::DispatchStage;

// ============================================================================
// Dispatch Errors - Failure taxonomy
// ============================================================================
//
// Every failure resolves to exactly one FailureKind:
// - Retryable:    redeliver the inbound record unchanged
// - NotRetryable: route the inbound record to the dead-letter topic
//
// EmitFailed is reported separately from the availability taxonomy. Some
// outbound events may already be on the broker, so it is never redelivered.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Retryable,
    NotRetryable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Retryable => "retryable",
            FailureKind::NotRetryable => "not_retryable",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by `DispatchService::process`
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Retryable stock check failure: {0}")]
    Retryable(#[source] StockCheckError),

    #[error("Not retryable stock check failure: {0}")]
    NotRetryable(#[source] StockCheckError),

    #[error("Failed to emit {stage} for order {order_id} after {emitted} event(s) were sent: {source}")]
    EmitFailed {
        stage: DispatchStage,
        order_id: Uuid,
        emitted: usize,
        #[source]
        source: PublishError,
    },
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::Retryable(_) => FailureKind::Retryable,
            DispatchError::NotRetryable(_) | DispatchError::EmitFailed { .. } => FailureKind::NotRetryable,
        }
    }

    /// True when outbound events were sent before the failure
    pub fn is_partial_emission(&self) -> bool {
        matches!(self, DispatchError::EmitFailed { emitted, .. } if *emitted > 0)
    }
}

impl From<StockCheckError> for DispatchError {
    fn from(err: StockCheckError) -> Self {
        if err.is_retryable() {
            DispatchError::Retryable(err)
        } else {
            DispatchError::NotRetryable(err)
        }
    }
}

impl IsTransient for DispatchError {
    fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Retryable
    }
}

/// Inbound records that can never be processed
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("Record has no payload")]
    MissingPayload,

    #[error("Malformed OrderCreated payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("OrderCreated has a nil orderId")]
    NilOrderId,

    #[error("OrderCreated {order_id} has an empty item")]
    EmptyItem { order_id: Uuid },
}
