use std::sync::Arc;
use futures_util::StreamExt;
use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaResult,
    message::Headers,
    Message, Offset, TopicPartitionList,
};

use crate::domain::dispatch::{
    DispatchOutcome, DispatchService, FailureKind, InboundError, OrderCreated,
};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, truncate_utf8, RetryConfig, RetryResult};

use super::publisher::{EventPublisher, OutboundRecord, PublishError};

// ============================================================================
// OrderCreated Listener
// ============================================================================
//
// Turns the failure kind reported by DispatchService into broker actions:
//
//   Ok                 -> commit
//   Retryable          -> redeliver (fixed backoff) up to max_attempts,
//                         then dead-letter
//   NotRetryable       -> dead-letter immediately
//   EmitFailed         -> dead-letter immediately; some outbound events may
//                         already be on the broker, redelivery would repeat them
//   undecodable record -> dead-letter immediately
//
// Dead-lettered records are the original payload, key and headers, unmodified,
// on `<inbound>.DLT`. Failure details and the source partition/offset are
// added as `dlt-*` headers.
//
// ============================================================================

pub const DLT_ORIGINAL_TOPIC_HEADER: &str = "dlt-original-topic";
pub const DLT_FAILURE_KIND_HEADER: &str = "dlt-failure-kind";
pub const DLT_EXCEPTION_MESSAGE_HEADER: &str = "dlt-exception-message";
pub const DLT_ATTEMPTS_HEADER: &str = "dlt-attempts";
pub const DLT_ORIGINAL_PARTITION_HEADER: &str = "dlt-original-partition";
pub const DLT_ORIGINAL_OFFSET_HEADER: &str = "dlt-original-offset";

/// Longest `dlt-exception-message` value written
pub const MAX_EXCEPTION_MESSAGE_BYTES: usize = 2048;

const DLT_HEADER_PREFIX: &str = "dlt-";

/// An inbound record copied out of the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
}

impl InboundRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            key: Some(key.into()),
            payload: Some(payload),
            headers: Vec::new(),
        }
    }

    pub fn from_message<M: Message>(message: &M) -> Self {
        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| {
                        let value = h
                            .value
                            .map(|v| String::from_utf8_lossy(v).into_owned())
                            .unwrap_or_default();
                        (h.key.to_string(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec),
            headers,
        }
    }

    pub fn key_or_empty(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }
}

/// Final state of one inbound record
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    Processed(DispatchOutcome),
    DeadLettered { kind: FailureKind, attempts: u32 },
}

pub struct OrderCreatedHandler {
    service: Arc<DispatchService>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryConfig,
    dead_letter_topic: String,
    metrics: Option<Arc<Metrics>>,
}

impl OrderCreatedHandler {
    pub fn new(
        service: Arc<DispatchService>,
        publisher: Arc<dyn EventPublisher>,
        retry: RetryConfig,
        dead_letter_topic: impl Into<String>,
    ) -> Self {
        Self {
            service,
            publisher,
            retry,
            dead_letter_topic: dead_letter_topic.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter_topic
    }

    /// Handle one inbound record to completion.
    ///
    /// Only fails when the record could not be dead-lettered; the caller must
    /// then leave its offset uncommitted.
    pub async fn handle(&self, record: &InboundRecord) -> Result<HandleOutcome, PublishError> {
        let metrics = self.metrics.as_deref();
        let _timer = metrics.map(|m| m.processing_duration.start_timer());
        if let Some(m) = metrics {
            m.orders_received.inc();
        }

        let key = record.key_or_empty();

        let order = match record
            .payload
            .as_deref()
            .ok_or(InboundError::MissingPayload)
            .and_then(OrderCreated::from_slice)
        {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(
                    key = %key,
                    topic = %record.topic,
                    offset = record.offset,
                    error = %e,
                    "Undecodable OrderCreated record"
                );
                if let Some(m) = metrics {
                    m.record_failure(FailureKind::NotRetryable.as_str());
                }
                let message = e.to_string();
                return self
                    .dead_letter(record, FailureKind::NotRetryable, &message, 1, "invalid_record")
                    .await;
            }
        };

        tracing::info!(
            key = %key,
            partition = record.partition,
            offset = record.offset,
            order_id = %order.order_id,
            item = %order.item,
            "📥 Received OrderCreated"
        );

        let service = &self.service;
        let order_ref = &order;
        let result = retry_on_transient(&self.retry, move |attempt| async move {
            if attempt > 1 {
                if let Some(m) = metrics {
                    m.redeliveries.inc();
                }
            }
            let result = service.process(key, order_ref).await;
            if let (Some(m), Err(e)) = (metrics, &result) {
                m.record_failure(e.kind().as_str());
            }
            result
        })
        .await;

        match result {
            RetryResult::Success(outcome) => {
                if let Some(m) = metrics {
                    if outcome == DispatchOutcome::Unavailable {
                        m.orders_unavailable.inc();
                    }
                    for event in outcome.emitted() {
                        m.record_emitted(event.event_type());
                    }
                }
                Ok(HandleOutcome::Processed(outcome))
            }
            RetryResult::PermanentFailure { error, attempts } => {
                if error.is_partial_emission() {
                    tracing::error!(
                        key = %key,
                        order_id = %order.order_id,
                        error = %error,
                        "Dispatch interrupted after partial emission, not redelivering"
                    );
                }
                let message = error.to_string();
                self.dead_letter(record, error.kind(), &message, attempts, "not_retryable")
                    .await
            }
            RetryResult::Exhausted { error, attempts } => {
                let message = error.to_string();
                self.dead_letter(record, error.kind(), &message, attempts, "retries_exhausted")
                    .await
            }
        }
    }

    async fn dead_letter(
        &self,
        record: &InboundRecord,
        kind: FailureKind,
        message: &str,
        attempts: u32,
        reason: &str,
    ) -> Result<HandleOutcome, PublishError> {
        let key = record.key_or_empty();

        tracing::error!(
            key = %key,
            topic = %record.topic,
            dead_letter_topic = %self.dead_letter_topic,
            kind = %kind,
            attempts = attempts,
            error = %message,
            "💀 Routing OrderCreated to dead-letter topic"
        );

        let mut dlt_record = OutboundRecord::new(
            self.dead_letter_topic.as_str(),
            key,
            record.payload.clone().unwrap_or_default(),
        );
        // Inbound headers travel along; stale dlt-* ones are replaced below
        dlt_record.headers = record
            .headers
            .iter()
            .filter(|(name, _)| !name.starts_with(DLT_HEADER_PREFIX))
            .cloned()
            .collect();

        let dlt_record = dlt_record
            .with_header(DLT_ORIGINAL_TOPIC_HEADER, record.topic.as_str())
            .with_header(DLT_ORIGINAL_PARTITION_HEADER, record.partition.to_string())
            .with_header(DLT_ORIGINAL_OFFSET_HEADER, record.offset.to_string())
            .with_header(DLT_FAILURE_KIND_HEADER, kind.as_str())
            .with_header(
                DLT_EXCEPTION_MESSAGE_HEADER,
                truncate_utf8(message.to_string(), MAX_EXCEPTION_MESSAGE_BYTES),
            )
            .with_header(DLT_ATTEMPTS_HEADER, attempts.to_string());

        self.publisher.publish(dlt_record).await?;

        if let Some(m) = self.metrics.as_deref() {
            m.record_dead_letter(reason);
        }

        Ok(HandleOutcome::DeadLettered { kind, attempts })
    }
}

fn commit(consumer: &StreamConsumer, record: &InboundRecord) -> KafkaResult<()> {
    let mut offsets = TopicPartitionList::new();
    let next = Offset::Offset(record.offset + 1);
    offsets.add_partition_offset(&record.topic, record.partition, next)?;
    consumer.commit(&offsets, CommitMode::Async)
}

/// Consume OrderCreated records until the stream ends.
///
/// Records are handled one at a time per consumer; the offset is committed
/// only after the record was processed or dead-lettered.
pub async fn run_listener(
    consumer: StreamConsumer,
    handler: Arc<OrderCreatedHandler>,
) -> anyhow::Result<()> {
    let mut stream = consumer.stream();

    while let Some(message) = stream.next().await {
        let record = match message {
            Ok(message) => InboundRecord::from_message(&message),
            Err(e) => {
                tracing::error!(error = %e, "Failed to receive record");
                continue;
            }
        };

        match handler.handle(&record).await {
            Ok(_) => {
                if let Err(e) = commit(&consumer, &record) {
                    tracing::warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Failed to commit offset (record may be redelivered)"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    key = %record.key_or_empty(),
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Failed to dead-letter record, stopping listener without committing"
                );
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Log every record that lands on the dead-letter topic
pub async fn run_dead_letter_logger(consumer: StreamConsumer) {
    let mut stream = consumer.stream();

    while let Some(message) = stream.next().await {
        match message {
            Ok(message) => {
                let record = InboundRecord::from_message(&message);
                let header = |name: &str| {
                    record
                        .headers
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default()
                };

                let payload = record.payload.as_deref().unwrap_or_default();
                let payload = String::from_utf8_lossy(payload);

                tracing::warn!(
                    topic = %record.topic,
                    key = %record.key_or_empty(),
                    original_topic = %header(DLT_ORIGINAL_TOPIC_HEADER),
                    original_partition = %header(DLT_ORIGINAL_PARTITION_HEADER),
                    original_offset = %header(DLT_ORIGINAL_OFFSET_HEADER),
                    kind = %header(DLT_FAILURE_KIND_HEADER),
                    attempts = %header(DLT_ATTEMPTS_HEADER),
                    error = %header(DLT_EXCEPTION_MESSAGE_HEADER),
                    payload = %payload,
                    "Event is dead lettered"
                );

                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(error = %e, "Failed to commit dead-letter offset");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to receive dead-letter record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::clients::StockServiceClient;
    use crate::domain::dispatch::{ApplicationIdentity, DispatchTopics};
    use crate::messaging::{RecordingPublisher, EVENT_TYPE_HEADER};

    const ORDER_CREATED_TOPIC: &str = "order.created";
    const DEAD_LETTER_TOPIC: &str = "order.created.DLT";
    const WAIT: Duration = Duration::from_secs(3);

    fn handler_for(
        server: &MockServer,
        publisher: &RecordingPublisher,
        max_attempts: u32,
    ) -> OrderCreatedHandler {
        handler_with_endpoint(&format!("{}/api/stock", server.uri()), publisher, max_attempts)
    }

    fn handler_with_endpoint(
        endpoint: &str,
        publisher: &RecordingPublisher,
        max_attempts: u32,
    ) -> OrderCreatedHandler {
        let checker = StockServiceClient::new(endpoint, Duration::from_secs(1)).unwrap();
        let service = DispatchService::new(
            Arc::new(checker),
            Arc::new(publisher.clone()),
            DispatchTopics::default(),
            ApplicationIdentity::generate(),
        );
        OrderCreatedHandler::new(
            Arc::new(service),
            Arc::new(publisher.clone()),
            RetryConfig::fixed(max_attempts, Duration::from_millis(10)),
            DEAD_LETTER_TOPIC,
        )
    }

    fn order_record(key: &str, order_id: Uuid) -> InboundRecord {
        let payload = serde_json::to_vec(&OrderCreated::new(order_id, "my-item")).unwrap();
        InboundRecord::new(ORDER_CREATED_TOPIC, key, payload)
    }

    fn dead_lettered(kind: FailureKind, attempts: u32) -> HandleOutcome {
        HandleOutcome::DeadLettered { kind, attempts }
    }

    fn stock_mock(status: u16, body: &str) -> Mock {
        Mock::given(method("GET"))
            .and(path("/api/stock"))
            .and(query_param("item", "my-item"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
    }

    #[tokio::test]
    async fn test_order_dispatch_flow_success() {
        let server = MockServer::start().await;
        stock_mock(200, "true").expect(1).mount(&server).await;
        let publisher = RecordingPublisher::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let handler = handler_for(&server, &publisher, 3).with_metrics(metrics.clone());
        let order_id = Uuid::new_v4();

        let outcome = tokio::time::timeout(WAIT, handler.handle(&order_record("k1", order_id)))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, HandleOutcome::Processed(DispatchOutcome::Dispatched(_))));

        let tracking = publisher.records_on("dispatch.tracking").await;
        let dispatched = publisher.records_on("order.dispatched").await;
        assert_eq!(tracking.len(), 2);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(tracking[0].header(EVENT_TYPE_HEADER), Some("DispatchPreparing"));
        assert_eq!(tracking[1].header(EVENT_TYPE_HEADER), Some("DispatchCompleted"));

        for record in tracking.iter().chain(dispatched.iter()) {
            assert_eq!(record.key, "k1");
            let value: serde_json::Value = serde_json::from_slice(&record.payload).unwrap();
            assert_eq!(value["orderId"], order_id.to_string());
        }
        assert!(publisher.records_on(DEAD_LETTER_TOPIC).await.is_empty());
        let emitted = metrics.dispatch_events_emitted.with_label_values(&["OrderDispatched"]);
        assert_eq!(emitted.get(), 1);
    }

    #[tokio::test]
    async fn test_order_dispatch_flow_unavailable() {
        let server = MockServer::start().await;
        stock_mock(200, "false").expect(1).mount(&server).await;
        let publisher = RecordingPublisher::new();
        let handler = handler_for(&server, &publisher, 3);

        let outcome = handler.handle(&order_record("k1", Uuid::new_v4())).await.unwrap();

        assert_eq!(outcome, HandleOutcome::Processed(DispatchOutcome::Unavailable));
        assert!(publisher.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_order_dispatch_flow_not_retryable_is_dead_lettered() {
        let server = MockServer::start().await;
        stock_mock(400, "bad request").expect(1).mount(&server).await;
        let publisher = RecordingPublisher::new();
        let handler = handler_for(&server, &publisher, 3);
        let record = order_record("k1", Uuid::new_v4());

        let outcome = tokio::time::timeout(WAIT, handler.handle(&record)).await.unwrap().unwrap();

        assert_eq!(outcome, dead_lettered(FailureKind::NotRetryable, 1));

        let records = publisher.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, DEAD_LETTER_TOPIC);
        assert_eq!(records[0].key, "k1");
        assert_eq!(Some(&records[0].payload), record.payload.as_ref());
        assert_eq!(records[0].header(DLT_ORIGINAL_TOPIC_HEADER), Some(ORDER_CREATED_TOPIC));
        assert_eq!(records[0].header(DLT_FAILURE_KIND_HEADER), Some("not_retryable"));
    }

    #[tokio::test]
    async fn test_order_dispatch_flow_retryable_then_success() {
        let server = MockServer::start().await;
        stock_mock(503, "Service unavailable")
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        stock_mock(200, "true").with_priority(2).mount(&server).await;
        let publisher = RecordingPublisher::new();
        let handler = handler_for(&server, &publisher, 3);

        let record = order_record("k1", Uuid::new_v4());
        let outcome = tokio::time::timeout(WAIT, handler.handle(&record))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(outcome, HandleOutcome::Processed(DispatchOutcome::Dispatched(_))));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);

        // Exactly one sequence, no duplicates from the redelivery
        let records = publisher.records().await;
        let types: Vec<_> = records.iter().filter_map(|r| r.header(EVENT_TYPE_HEADER)).collect();
        assert_eq!(types, vec!["DispatchPreparing", "OrderDispatched", "DispatchCompleted"]);
    }

    #[tokio::test]
    async fn test_order_dispatch_flow_retries_exhausted_is_dead_lettered() {
        let server = MockServer::start().await;
        stock_mock(503, "Service unavailable").expect(3).mount(&server).await;
        let publisher = RecordingPublisher::new();
        let handler = handler_for(&server, &publisher, 3);

        let outcome = handler.handle(&order_record("k1", Uuid::new_v4())).await.unwrap();

        assert_eq!(outcome, dead_lettered(FailureKind::Retryable, 3));
        let records = publisher.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, DEAD_LETTER_TOPIC);
        assert_eq!(records[0].header(DLT_ATTEMPTS_HEADER), Some("3"));
    }

    #[tokio::test]
    async fn test_partial_emission_is_dead_lettered_without_redelivery() {
        let server = MockServer::start().await;
        stock_mock(200, "true").expect(1).mount(&server).await;
        let publisher = RecordingPublisher::new();
        publisher.fail_on_event_type("OrderDispatched").await;
        let handler = handler_for(&server, &publisher, 3);

        let outcome = handler.handle(&order_record("k1", Uuid::new_v4())).await.unwrap();

        assert_eq!(outcome, dead_lettered(FailureKind::NotRetryable, 1));
        assert_eq!(publisher.records_on("dispatch.tracking").await.len(), 1);
        assert!(publisher.records_on("order.dispatched").await.is_empty());
        assert_eq!(publisher.records_on(DEAD_LETTER_TOPIC).await.len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_record_skips_stock_check() {
        let server = MockServer::start().await;
        stock_mock(200, "true").expect(0).mount(&server).await;
        let publisher = RecordingPublisher::new();
        let handler = handler_for(&server, &publisher, 3);
        let payload = b"{\"not\":\"an order\"}".to_vec();
        let record = InboundRecord::new(ORDER_CREATED_TOPIC, "k1", payload);

        let outcome = handler.handle(&record).await.unwrap();

        assert_eq!(outcome, dead_lettered(FailureKind::NotRetryable, 1));
        assert_eq!(publisher.records_on(DEAD_LETTER_TOPIC).await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_processed_with_empty_key() {
        let server = MockServer::start().await;
        stock_mock(200, "true").mount(&server).await;
        let publisher = RecordingPublisher::new();
        let handler = handler_for(&server, &publisher, 3);
        let mut record = order_record("ignored", Uuid::new_v4());
        record.key = None;

        handler.handle(&record).await.unwrap();

        assert!(publisher.records().await.iter().all(|r| r.key.is_empty()));
    }

    #[tokio::test]
    async fn test_dead_letter_keeps_inbound_headers_and_position() {
        let server = MockServer::start().await;
        stock_mock(400, "bad request").expect(1).mount(&server).await;
        let publisher = RecordingPublisher::new();
        let handler = handler_for(&server, &publisher, 3);
        let mut record = order_record("k1", Uuid::new_v4());
        record.partition = 2;
        record.offset = 42;
        record.headers = vec![
            ("traceparent".to_string(), "abc".to_string()),
            (DLT_ATTEMPTS_HEADER.to_string(), "stale".to_string()),
        ];

        handler.handle(&record).await.unwrap();

        let records = publisher.records_on(DEAD_LETTER_TOPIC).await;
        assert_eq!(records.len(), 1);
        let dlt = &records[0];
        assert_eq!(dlt.header("traceparent"), Some("abc"));
        assert_eq!(dlt.header(DLT_ORIGINAL_TOPIC_HEADER), Some(ORDER_CREATED_TOPIC));
        assert_eq!(dlt.header(DLT_ORIGINAL_PARTITION_HEADER), Some("2"));
        assert_eq!(dlt.header(DLT_ORIGINAL_OFFSET_HEADER), Some("42"));
        assert_eq!(dlt.header(DLT_FAILURE_KIND_HEADER), Some("not_retryable"));
        assert_eq!(dlt.header(DLT_ATTEMPTS_HEADER), Some("1"));
        let attempts_headers = dlt.headers.iter().filter(|(n, _)| n == DLT_ATTEMPTS_HEADER);
        assert_eq!(attempts_headers.count(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_exception_message_is_capped() {
        let server = MockServer::start().await;
        let body = "x".repeat(2 * 1024 * 1024);
        stock_mock(400, &body).expect(1).mount(&server).await;
        let publisher = RecordingPublisher::new();
        let handler = handler_for(&server, &publisher, 3);

        let record = order_record("k1", Uuid::new_v4());
        let outcome = tokio::time::timeout(WAIT, handler.handle(&record))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, dead_lettered(FailureKind::NotRetryable, 1));
        let records = publisher.records_on(DEAD_LETTER_TOPIC).await;
        let message = records[0].header(DLT_EXCEPTION_MESSAGE_HEADER).unwrap();
        assert!(message.len() <= MAX_EXCEPTION_MESSAGE_BYTES);
        assert!(message.contains("400"));
    }

    #[tokio::test]
    async fn test_unreachable_stock_service_is_redelivered_then_dead_lettered() {
        // Nothing listens on port 1
        let publisher = RecordingPublisher::new();
        let handler = handler_with_endpoint("http://127.0.0.1:1/api/stock", &publisher, 2);

        let record = order_record("k1", Uuid::new_v4());
        let outcome = tokio::time::timeout(WAIT, handler.handle(&record))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, dead_lettered(FailureKind::Retryable, 2));
        assert!(publisher.records_on("dispatch.tracking").await.is_empty());
        assert!(publisher.records_on("order.dispatched").await.is_empty());
        let records = publisher.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, DEAD_LETTER_TOPIC);
        assert_eq!(records[0].header(DLT_FAILURE_KIND_HEADER), Some("retryable"));
        assert_eq!(records[0].header(DLT_ATTEMPTS_HEADER), Some("2"));
    }
}
