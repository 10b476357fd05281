// ============================================================================
// Messaging - Broker plumbing
// ============================================================================
//
// - publisher: EventPublisher trait, the seam the workflow publishes through
// - redpanda:  rdkafka producer/consumer construction
// - listener:  OrderCreated consumer loop, redelivery and dead-lettering
// - memory:    in-memory publisher for tests and local runs
//
// ============================================================================

mod listener;
mod memory;
mod publisher;
mod redpanda;

pub use listener::{
    run_dead_letter_logger, run_listener, HandleOutcome, InboundRecord, OrderCreatedHandler,
    DLT_ATTEMPTS_HEADER, DLT_EXCEPTION_MESSAGE_HEADER, DLT_FAILURE_KIND_HEADER,
    DLT_ORIGINAL_OFFSET_HEADER, DLT_ORIGINAL_PARTITION_HEADER, DLT_ORIGINAL_TOPIC_HEADER,
    MAX_EXCEPTION_MESSAGE_BYTES,
};
pub use memory::RecordingPublisher;
pub use publisher::{EventPublisher, OutboundRecord, PublishError};
pub use redpanda::{create_consumer, RedpandaClient};

/// Header naming the record shape of an outbound payload
pub const EVENT_TYPE_HEADER: &str = "event_type";

/// Dead-letter topic paired with an inbound topic
pub fn dead_letter_topic(inbound: &str) -> String {
    format!("{inbound}.DLT")
}
