use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::publisher::{EventPublisher, OutboundRecord, PublishError};
use super::EVENT_TYPE_HEADER;

// ============================================================================
// In-memory publisher
// ============================================================================
//
// Records every acknowledged record in send order. Can be told to reject
// records of a given event type to simulate a broker failure mid-sequence.
//
// ============================================================================

#[derive(Default)]
struct RecordingState {
    records: Vec<OutboundRecord>,
    attempts: usize,
    failing_event_type: Option<String>,
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every record whose `event_type` header matches
    pub async fn fail_on_event_type(&self, event_type: &str) {
        self.state.lock().await.failing_event_type = Some(event_type.to_string());
    }

    pub async fn records(&self) -> Vec<OutboundRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn records_on(&self, topic: &str) -> Vec<OutboundRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of publish calls, successful or not
    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, record: OutboundRecord) -> Result<(), PublishError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;

        let rejected = match (&state.failing_event_type, record.header(EVENT_TYPE_HEADER)) {
            (Some(failing), Some(actual)) => failing == actual,
            _ => false,
        };
        if rejected {
            return Err(PublishError::Delivery {
                topic: record.topic,
                reason: "simulated broker failure".to_string(),
            });
        }

        state.records.push(record);
        Ok(())
    }
}
