use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::errors::InboundError;

// ============================================================================
// Dispatch Events - Wire records exchanged with the broker
// ============================================================================
//
// Inbound:  OrderCreated      (order.created)
// Outbound: DispatchPreparing (dispatch.tracking)
//           OrderDispatched   (order.dispatched)
//           DispatchCompleted (dispatch.tracking)
//
// All records are JSON with camelCase field names. Consumers of the outbound
// topics receive at-least-once and must be idempotent on orderId.
//
// ============================================================================

/// Base trait for every record that crosses the broker
pub trait DomainEvent {
    /// Name carried in the `event_type` header of outbound records
    fn event_type() -> &'static str;
}

/// Order Created - Inbound trigger for the dispatch workflow
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub item: String,
}

impl DomainEvent for OrderCreated {
    fn event_type() -> &'static str { "OrderCreated" }
}

impl OrderCreated {
    pub fn new(order_id: Uuid, item: impl Into<String>) -> Self {
        Self { order_id, item: item.into() }
    }

    /// Decode and validate an inbound payload
    pub fn from_slice(payload: &[u8]) -> Result<Self, InboundError> {
        let order: OrderCreated = serde_json::from_slice(payload)?;
        order.validate()?;
        Ok(order)
    }

    pub fn validate(&self) -> Result<(), InboundError> {
        if self.order_id.is_nil() {
            return Err(InboundError::NilOrderId);
        }
        if self.item.trim().is_empty() {
            return Err(InboundError::EmptyItem { order_id: self.order_id });
        }
        Ok(())
    }
}

/// Dispatch Preparing - Tracking event, first in the sequence
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPreparing {
    pub order_id: Uuid,
}

impl DomainEvent for DispatchPreparing {
    fn event_type() -> &'static str { "DispatchPreparing" }
}

/// Order Dispatched - Stamped with the instance that handled the order
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderDispatched {
    pub order_id: Uuid,
    pub processed_by_id: Uuid,
    pub notes: String,
}

impl DomainEvent for OrderDispatched {
    fn event_type() -> &'static str { "OrderDispatched" }
}

/// Dispatch Completed - Tracking event, last in the sequence
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchCompleted {
    pub order_id: Uuid,
    pub date: DateTime<Utc>,
}

impl DomainEvent for DispatchCompleted {
    fn event_type() -> &'static str { "DispatchCompleted" }
}

/// Union of the outbound records, in the order they are emitted
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DispatchEvent {
    Preparing(DispatchPreparing),
    Dispatched(OrderDispatched),
    Completed(DispatchCompleted),
}

impl DispatchEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            DispatchEvent::Preparing(e) => e.order_id,
            DispatchEvent::Dispatched(e) => e.order_id,
            DispatchEvent::Completed(e) => e.order_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            DispatchEvent::Preparing(_) => DispatchPreparing::event_type(),
            DispatchEvent::Dispatched(_) => OrderDispatched::event_type(),
            DispatchEvent::Completed(_) => DispatchCompleted::event_type(),
        }
    }

    /// JSON body as published, without the enum tag
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            DispatchEvent::Preparing(e) => serde_json::to_vec(e),
            DispatchEvent::Dispatched(e) => serde_json::to_vec(e),
            DispatchEvent::Completed(e) => serde_json::to_vec(e),
        }
    }
}
