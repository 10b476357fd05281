use std::str::FromStr;
use std::time::Duration;

use crate::domain::dispatch::DispatchTopics;
use crate::messaging::dead_letter_topic;
use crate::utils::RetryConfig;

// ============================================================================
// Configuration
// ============================================================================
//
// Reads from environment variables, falling back to defaults:
// - KAFKA_BOOTSTRAP_SERVERS            (default: "localhost:9092")
// - DISPATCH_CONSUMER_GROUP            (default: "dispatch.order.created.consumer")
// - ORDER_CREATED_TOPIC                (default: "order.created")
// - ORDER_DISPATCHED_TOPIC             (default: "order.dispatched")
// - DISPATCH_TRACKING_TOPIC            (default: "dispatch.tracking")
// - DISPATCH_STOCK_SERVICE_ENDPOINT    (default: "http://localhost:9001/api/stock")
// - DISPATCH_STOCK_SERVICE_TIMEOUT_MS  (default: 5000)
// - DISPATCH_SEND_TIMEOUT_MS           (default: 5000)
// - DISPATCH_RETRY_MAX_ATTEMPTS        (default: 4, total attempts)
// - DISPATCH_RETRY_BACKOFF_MS          (default: 100)
// - DISPATCH_LISTENER_CONCURRENCY      (default: 1)
// - METRICS_PORT                       (default: 9090)
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{name} must be at least 1")]
    MustBePositive { name: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub bootstrap_servers: String,
    pub consumer_group: String,
    pub order_created_topic: String,
    pub order_dispatched_topic: String,
    pub dispatch_tracking_topic: String,
    pub stock_service_endpoint: String,
    pub stock_service_timeout: Duration,
    pub send_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_backoff: Duration,
    pub listener_concurrency: usize,
    pub metrics_port: u16,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            consumer_group: "dispatch.order.created.consumer".to_string(),
            order_created_topic: "order.created".to_string(),
            order_dispatched_topic: "order.dispatched".to_string(),
            dispatch_tracking_topic: "dispatch.tracking".to_string(),
            stock_service_endpoint: "http://localhost:9001/api/stock".to_string(),
            stock_service_timeout: Duration::from_millis(5000),
            send_timeout: Duration::from_millis(5000),
            retry_max_attempts: 4,
            retry_backoff: Duration::from_millis(100),
            listener_concurrency: 1,
            metrics_port: 9090,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source, unset names keep their default
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |name: &str, default: String| lookup(name).unwrap_or(default);

        let config = Self {
            bootstrap_servers: text("KAFKA_BOOTSTRAP_SERVERS", defaults.bootstrap_servers),
            consumer_group: text("DISPATCH_CONSUMER_GROUP", defaults.consumer_group),
            order_created_topic: text("ORDER_CREATED_TOPIC", defaults.order_created_topic),
            order_dispatched_topic: text(
                "ORDER_DISPATCHED_TOPIC",
                defaults.order_dispatched_topic,
            ),
            dispatch_tracking_topic: text(
                "DISPATCH_TRACKING_TOPIC",
                defaults.dispatch_tracking_topic,
            ),
            stock_service_endpoint: text(
                "DISPATCH_STOCK_SERVICE_ENDPOINT",
                defaults.stock_service_endpoint,
            ),
            stock_service_timeout: millis(
                &lookup,
                "DISPATCH_STOCK_SERVICE_TIMEOUT_MS",
                defaults.stock_service_timeout,
            )?,
            send_timeout: millis(&lookup, "DISPATCH_SEND_TIMEOUT_MS", defaults.send_timeout)?,
            retry_max_attempts: parsed(
                &lookup,
                "DISPATCH_RETRY_MAX_ATTEMPTS",
                defaults.retry_max_attempts,
            )?,
            retry_backoff: millis(&lookup, "DISPATCH_RETRY_BACKOFF_MS", defaults.retry_backoff)?,
            listener_concurrency: parsed(
                &lookup,
                "DISPATCH_LISTENER_CONCURRENCY",
                defaults.listener_concurrency,
            )?,
            metrics_port: parsed(&lookup, "METRICS_PORT", defaults.metrics_port)?,
        };

        if config.retry_max_attempts == 0 {
            return Err(ConfigError::MustBePositive { name: "DISPATCH_RETRY_MAX_ATTEMPTS" });
        }
        if config.listener_concurrency == 0 {
            return Err(ConfigError::MustBePositive { name: "DISPATCH_LISTENER_CONCURRENCY" });
        }

        Ok(config)
    }

    pub fn dead_letter_topic(&self) -> String {
        dead_letter_topic(&self.order_created_topic)
    }

    pub fn topics(&self) -> DispatchTopics {
        DispatchTopics {
            tracking: self.dispatch_tracking_topic.clone(),
            dispatched: self.order_dispatched_topic.clone(),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::fixed(self.retry_max_attempts, self.retry_backoff)
    }
}

fn parsed<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

fn millis<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parsed(lookup, name, default.as_millis() as u64).map(Duration::from_millis)
}
