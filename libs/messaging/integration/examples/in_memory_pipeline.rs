//! In-memory pipeline demo
//!
//! Produces a few orders (one of them large enough to be chunked), consumes
//! them through an inbound connector configured from TOML, and dead-letters
//! the order the application keeps rejecting.
//!
//! Run with `RUST_LOG=broker_integration=debug` to follow every step.

use anyhow::{Context, Result};
use broker_integration::test_utils::{wait_until, MemoryTransport};
use broker_integration::{
    header_names, Broker, BusMessage, Endpoint, HandlerError, InboundConnector,
    JsonMessageSerializer, Message, MessageHeaders, MessageSerializer, MessageTypeRegistry,
};
use integration_config::IntegrationConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
[endpoints.orders]
chunk_size = 64

[endpoints.orders.client]
bootstrap = "memory://local"

[endpoints.orders-dlq.client]
bootstrap = "memory://local"

[[inbound]]
endpoint = "orders"
unwrap_messages = true
redelivery_delay_ms = 10
error_policies = [
    { kind = "retry", max_attempts = 2 },
    { kind = "move", endpoint = "orders-dlq" },
]
"#;

#[derive(Debug, Serialize, Deserialize)]
struct OrderPlaced {
    id: u64,
    lines: Vec<String>,
}
impl Message for OrderPlaced {}

#[derive(Debug, thiserror::Error)]
#[error("order {0} rejected by inventory")]
struct Rejected(u64);

fn handle(batch: &[BusMessage]) -> std::result::Result<(), HandlerError> {
    for message in batch {
        let BusMessage::Inbound(inbound) = message else {
            continue;
        };
        let Some(order) = inbound.message_as::<OrderPlaced>() else {
            continue;
        };
        if order.id == 13 {
            return Err(Box::new(Rejected(order.id)));
        }
        info!(
            "Order {} with {} lines (failed attempts: {})",
            order.id,
            order.lines.len(),
            inbound.failed_attempts
        );
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = IntegrationConfig::from_toml_str(CONFIG)?;
    config.expand_env_vars()?;
    config.validate()?;

    let serializer: Arc<dyn MessageSerializer> = Arc::new(JsonMessageSerializer::new(
        MessageTypeRegistry::new().with::<OrderPlaced>("order-placed"),
    ));
    let transport = Arc::new(MemoryTransport::new());
    let broker = Arc::new(Broker::new(transport.clone()));

    let orders = Arc::new(Endpoint::from_settings(
        "orders",
        config.endpoint("orders").context("orders endpoint")?,
        serializer.clone(),
    ));
    let producer = broker.producer(orders)?;
    for id in [1, 13, 2] {
        let lines = (0..id).map(|n| format!("sku-{:04}", n)).collect();
        producer
            .produce_async(&OrderPlaced { id, lines }, MessageHeaders::new())
            .await?;
    }
    info!(
        "Produced 3 orders as {} records",
        transport.published("orders").len()
    );

    let mut connector = InboundConnector::new(broker.clone(), Arc::new(handle));
    connector.bind_from_config(&config, serializer.clone()).await?;
    let running = connector.start();

    let records = transport.published("orders").len();
    if !wait_until(Duration::from_secs(5), || {
        transport.committed_count("orders") == records
    })
    .await
    {
        warn!("Timed out waiting for the orders to be committed");
    }

    for stats in running.stop().await? {
        info!("Consumer stats: {:?}", stats);
    }

    for record in transport.published("orders-dlq") {
        info!(
            "Dead-lettered {} after {} failed attempts",
            record.headers.get(header_names::MESSAGE_TYPE).unwrap_or("?"),
            record.headers.get(header_names::FAILED_ATTEMPTS).unwrap_or("0")
        );
    }

    broker.shutdown().await?;
    Ok(())
}
