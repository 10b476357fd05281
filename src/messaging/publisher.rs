use async_trait::async_trait;

// ============================================================================
// Event Publisher - Seam between the workflow and the broker
// ============================================================================

/// A record ready to be written to a topic
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delivery to {topic} failed: {reason}")]
    Delivery { topic: String, reason: String },
}

/// Publishes a record and resolves once the broker acknowledged it
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, record: OutboundRecord) -> Result<(), PublishError>;
}
