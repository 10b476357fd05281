use std::time::Duration;
use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    error::KafkaResult,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};

use super::publisher::{EventPublisher, OutboundRecord, PublishError};

pub struct RedpandaClient {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl RedpandaClient {
    pub fn new(brokers: &str, send_timeout: Duration) -> KafkaResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", send_timeout.as_millis().to_string())
            .set("acks", "all")
            .create()?;

        tracing::info!(brokers = %brokers, "Redpanda producer created");

        Ok(Self { producer, send_timeout })
    }
}

#[async_trait]
impl EventPublisher for RedpandaClient {
    async fn publish(&self, record: OutboundRecord) -> Result<(), PublishError> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (name, value) in &record.headers {
            headers = headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            });
        }

        let future_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.payload)
            .headers(headers);

        // Resolves only after the broker acknowledged the write
        match self.producer.send(future_record, Timeout::After(self.send_timeout)).await {
            Ok(_) => {
                tracing::debug!(
                    topic = %record.topic,
                    key = %record.key,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err((e, _)) => {
                tracing::error!(
                    error = %e,
                    topic = %record.topic,
                    key = %record.key,
                    "Failed to publish to Redpanda"
                );
                Err(PublishError::Delivery {
                    topic: record.topic,
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Create a consumer in `group_id` subscribed to `topics`.
///
/// Auto-commit is disabled: offsets are committed by the listener once a
/// record has been fully handled, which gives at-least-once delivery.
pub fn create_consumer(brokers: &str, group_id: &str, topics: &[&str]) -> KafkaResult<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "6000")
        .set("enable.partition.eof", "false")
        .create()?;

    consumer.subscribe(topics)?;

    tracing::info!(
        topics = ?topics,
        group_id = %group_id,
        "Subscribed to topics"
    );

    Ok(consumer)
}
