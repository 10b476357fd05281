use std::fmt;
use std::sync::Arc;
use chrono::Utc;

use crate::clients::AvailabilityChecker;
use crate::messaging::{EventPublisher, OutboundRecord, PublishError, EVENT_TYPE_HEADER};

use super::errors::DispatchError;
use super::events::{
    DispatchCompleted, DispatchEvent, DispatchPreparing, OrderCreated, OrderDispatched,
};
use super::identity::ApplicationIdentity;

// ============================================================================
// Dispatch Service
// ============================================================================
//
// Orchestrates: OrderCreated → stock check → DispatchPreparing
//                                          → OrderDispatched
//                                          → DispatchCompleted
//
// Each send is awaited before the next one starts. The first failure stops
// the sequence; events already sent stay sent (no rollback). Delivery is
// at-least-once, so consumers of the outbound topics dedupe on orderId.
//
// ============================================================================

/// Position in the per-order workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    CheckingAvailability,
    EmittingPreparing,
    EmittingDispatched,
    EmittingCompleted,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchStage::CheckingAvailability => "availability check",
            DispatchStage::EmittingPreparing => "DispatchPreparing",
            DispatchStage::EmittingDispatched => "OrderDispatched",
            DispatchStage::EmittingCompleted => "DispatchCompleted",
        };
        f.write_str(name)
    }
}

/// Successful end states of `DispatchService::process`
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Item out of stock, nothing emitted
    Unavailable,
    /// All three events emitted, in send order
    Dispatched(Vec<DispatchEvent>),
}

impl DispatchOutcome {
    pub fn emitted(&self) -> &[DispatchEvent] {
        match self {
            DispatchOutcome::Unavailable => &[],
            DispatchOutcome::Dispatched(events) => events,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchTopics {
    pub tracking: String,
    pub dispatched: String,
}

impl Default for DispatchTopics {
    fn default() -> Self {
        Self {
            tracking: "dispatch.tracking".to_string(),
            dispatched: "order.dispatched".to_string(),
        }
    }
}

pub struct DispatchService {
    checker: Arc<dyn AvailabilityChecker>,
    publisher: Arc<dyn EventPublisher>,
    topics: DispatchTopics,
    application_id: ApplicationIdentity,
}

impl DispatchService {
    pub fn new(
        checker: Arc<dyn AvailabilityChecker>,
        publisher: Arc<dyn EventPublisher>,
        topics: DispatchTopics,
        application_id: ApplicationIdentity,
    ) -> Self {
        Self { checker, publisher, topics, application_id }
    }

    pub fn application_id(&self) -> ApplicationIdentity {
        self.application_id
    }

    /// Run the dispatch workflow for one inbound order.
    ///
    /// `key` is copied unchanged onto every outbound record.
    pub async fn process(&self, key: &str, order: &OrderCreated) -> Result<DispatchOutcome, DispatchError> {
        let available = match self.checker.check_availability(&order.item).await {
            Ok(available) => available,
            Err(e) => {
                let err = DispatchError::from(e);
                tracing::warn!(
                    key = %key,
                    order_id = %order.order_id,
                    item = %order.item,
                    stage = %DispatchStage::CheckingAvailability,
                    kind = %err.kind(),
                    error = %err,
                    "Stock check failed"
                );
                return Err(err);
            }
        };

        if !available {
            tracing::info!(
                key = %key,
                order_id = %order.order_id,
                item = %order.item,
                "Item is unavailable, nothing dispatched"
            );
            return Ok(DispatchOutcome::Unavailable);
        }

        let mut emitted = Vec::with_capacity(3);

        let preparing = DispatchEvent::Preparing(DispatchPreparing { order_id: order.order_id });
        self.emit(DispatchStage::EmittingPreparing, &self.topics.tracking, key, preparing, &mut emitted)
            .await?;

        let dispatched = DispatchEvent::Dispatched(OrderDispatched {
            order_id: order.order_id,
            processed_by_id: self.application_id.id(),
            notes: format!("Dispatched: {}", order.item),
        });
        self.emit(DispatchStage::EmittingDispatched, &self.topics.dispatched, key, dispatched, &mut emitted)
            .await?;

        let completed = DispatchEvent::Completed(DispatchCompleted {
            order_id: order.order_id,
            date: Utc::now(),
        });
        self.emit(DispatchStage::EmittingCompleted, &self.topics.tracking, key, completed, &mut emitted)
            .await?;

        tracing::info!(
            key = %key,
            order_id = %order.order_id,
            processed_by_id = %self.application_id,
            "✅ Sent dispatch messages"
        );

        Ok(DispatchOutcome::Dispatched(emitted))
    }

    async fn emit(
        &self,
        stage: DispatchStage,
        topic: &str,
        key: &str,
        event: DispatchEvent,
        emitted: &mut Vec<DispatchEvent>,
    ) -> Result<(), DispatchError> {
        let order_id = event.order_id();

        let result = match event.to_payload() {
            Ok(payload) => {
                let record = OutboundRecord::new(topic, key, payload)
                    .with_header(EVENT_TYPE_HEADER, event.event_type());
                self.publisher.publish(record).await
            }
            Err(e) => Err(PublishError::from(e)),
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    key = %key,
                    order_id = %order_id,
                    topic = %topic,
                    event_type = event.event_type(),
                    "Dispatch event sent"
                );
                emitted.push(event);
                Ok(())
            }
            Err(source) => {
                tracing::error!(
                    key = %key,
                    order_id = %order_id,
                    topic = %topic,
                    stage = %stage,
                    already_emitted = emitted.len(),
                    error = %source,
                    "Failed to send dispatch event, remaining events skipped"
                );
                Err(DispatchError::EmitFailed {
                    stage,
                    order_id,
                    emitted: emitted.len(),
                    source,
                })
            }
        }
    }
}
