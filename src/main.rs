use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_dispatch::clients::StockServiceClient;
use order_dispatch::config::DispatchConfig;
use order_dispatch::domain::dispatch::{ApplicationIdentity, DispatchService};
use order_dispatch::messaging::{
    create_consumer, run_dead_letter_logger, run_listener, OrderCreatedHandler, RedpandaClient,
};
use order_dispatch::metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_dispatch=debug"))
        )
        .init();

    let config = DispatchConfig::from_env()?;

    // One id for the lifetime of the process, stamped on every OrderDispatched
    let application_id = ApplicationIdentity::generate();

    tracing::info!(
        application_id = %application_id,
        brokers = %config.bootstrap_servers,
        inbound = %config.order_created_topic,
        stock_service = %config.stock_service_endpoint,
        "🚀 Starting order dispatch service"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        if let Err(e) = system.block_on(metrics::start_metrics_server(metrics_registry, metrics_port)) {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 2. Collaborators ===
    let redpanda = Arc::new(RedpandaClient::new(&config.bootstrap_servers, config.send_timeout)?);
    let stock_client = Arc::new(StockServiceClient::new(
        config.stock_service_endpoint.clone(),
        config.stock_service_timeout,
    )?);

    let service = Arc::new(DispatchService::new(
        stock_client,
        redpanda.clone(),
        config.topics(),
        application_id,
    ));

    let handler = Arc::new(
        OrderCreatedHandler::new(service, redpanda, config.retry(), config.dead_letter_topic())
            .with_metrics(metrics.clone()),
    );

    // === 3. Listeners ===
    let mut listeners = JoinSet::new();
    for worker in 0..config.listener_concurrency {
        let consumer = create_consumer(
            &config.bootstrap_servers,
            &config.consumer_group,
            &[config.order_created_topic.as_str()],
        )?;
        let handler = handler.clone();
        listeners.spawn(async move {
            tracing::info!(worker = worker, "OrderCreated listener started");
            run_listener(consumer, handler).await
        });
    }

    let dead_letter_topic = config.dead_letter_topic();
    let dlt_consumer = create_consumer(
        &config.bootstrap_servers,
        &format!("{}.dlt", config.consumer_group),
        &[dead_letter_topic.as_str()],
    )?;
    tokio::spawn(run_dead_letter_logger(dlt_consumer));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
        Some(joined) = listeners.join_next() => {
            match joined {
                Ok(Ok(())) => tracing::warn!("Listener stream ended"),
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(e.into()),
            }
        }
    }

    listeners.shutdown().await;
    tracing::info!("👋 Order dispatch service stopped");

    Ok(())
}
