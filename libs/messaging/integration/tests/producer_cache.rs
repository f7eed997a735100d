//! Producer client sharing and disposal through the broker's client cache.

use broker_integration::test_utils::MemoryTransport;
use broker_integration::{
    Broker, ClientConfig, Endpoint, IntegrationError, JsonMessageSerializer, Message,
    MessageHeaders, MessageSerializer, MessageTypeRegistry, ProducerClient,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct PriceUpdated {
    symbol: String,
    price: f64,
}
impl Message for PriceUpdated {}

fn serializer() -> Arc<dyn MessageSerializer> {
    Arc::new(JsonMessageSerializer::new(
        MessageTypeRegistry::new().with::<PriceUpdated>("price-updated"),
    ))
}

fn same_client(a: &Arc<dyn ProducerClient>, b: &Arc<dyn ProducerClient>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn setup() -> (Arc<MemoryTransport>, Broker) {
    let transport = Arc::new(MemoryTransport::new());
    let broker = Broker::new(transport.clone());
    (transport, broker)
}

fn update() -> PriceUpdated {
    PriceUpdated {
        symbol: "ETH".to_string(),
        price: 3120.5,
    }
}

#[tokio::test]
async fn equal_configurations_share_one_client() {
    let (transport, broker) = setup();

    let prices = Endpoint::new("prices", serializer()).with_client_config(
        ClientConfig::new()
            .with("bootstrap", "localhost:9092")
            .with("acks", "all"),
    );
    let audit = Endpoint::new("audit", serializer()).with_client_config(
        ClientConfig::new()
            .with("acks", "all")
            .with("bootstrap", "localhost:9092"),
    );

    let first = broker.producer(Arc::new(prices)).unwrap();
    let second = broker.producer(Arc::new(audit)).unwrap();

    let a = first.client().await.unwrap();
    let b = second.client().await.unwrap();

    assert!(same_client(&a, &b));
    assert_eq!(transport.producers_created(), 1);
    assert_eq!(broker.client_cache().len(), 1);
}

#[tokio::test]
async fn different_configurations_get_their_own_client() {
    let (transport, broker) = setup();

    let fast = Endpoint::new("prices", serializer())
        .with_client_config(ClientConfig::new().with("acks", "1"));
    let safe = Endpoint::new("prices", serializer())
        .with_client_config(ClientConfig::new().with("acks", "all"));

    let a = broker.producer(Arc::new(fast)).unwrap().client().await.unwrap();
    let b = broker.producer(Arc::new(safe)).unwrap().client().await.unwrap();

    assert!(!same_client(&a, &b));
    assert_eq!(transport.producers_created(), 2);
}

#[tokio::test]
async fn disposal_then_reconstruction_creates_a_new_client() {
    let (transport, broker) = setup();
    let endpoint = Arc::new(Endpoint::new("prices", serializer()));
    let producer = broker.producer(endpoint.clone()).unwrap();

    producer
        .produce_async(&update(), MessageHeaders::new())
        .await
        .unwrap();
    let original = producer.client().await.unwrap();

    assert!(producer.dispose().await.unwrap());
    assert!(!producer.dispose().await.unwrap());

    let err = original
        .produce(broker_integration::Envelope::new(
            "prices",
            b"{}".to_vec(),
            MessageHeaders::new(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, IntegrationError::ProducerClosed(_)));

    // Any producer on the same configuration transparently gets a new client
    let other = broker.producer(endpoint).unwrap();
    other
        .produce_async(&update(), MessageHeaders::new())
        .await
        .unwrap();
    let replacement = other.client().await.unwrap();

    assert!(!same_client(&original, &replacement));
    assert_eq!(transport.producers_created(), 2);
    assert_eq!(transport.published("prices").len(), 2);
}

#[tokio::test]
async fn concurrent_callers_receive_the_same_client() {
    let (_transport, broker) = setup();
    let broker = Arc::new(broker);
    let endpoint = Arc::new(
        Endpoint::new("prices", serializer())
            .with_client_config(ClientConfig::new().with("bootstrap", "localhost:9092")),
    );

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let producer = broker.producer(endpoint.clone()).unwrap();
            tokio::spawn(async move { producer.client().await.unwrap() })
        })
        .collect();

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap());
    }

    assert!(clients.iter().all(|c| same_client(c, &clients[0])));
    assert_eq!(broker.client_cache().len(), 1);
}

#[tokio::test]
async fn shutdown_releases_every_client() {
    let (_transport, broker) = setup();

    for acks in ["0", "1", "all"] {
        let endpoint = Endpoint::new("prices", serializer())
            .with_client_config(ClientConfig::new().with("acks", acks));
        broker
            .producer(Arc::new(endpoint))
            .unwrap()
            .produce_async(&update(), MessageHeaders::new())
            .await
            .unwrap();
    }
    assert_eq!(broker.client_cache().len(), 3);

    broker.shutdown().await.unwrap();
    assert!(broker.client_cache().is_empty());
}

#[test]
fn blocking_produce_without_a_runtime() {
    let (transport, broker) = setup();
    let producer = broker
        .producer(Arc::new(Endpoint::new("prices", serializer())))
        .unwrap();

    let offset = producer.produce(&update(), MessageHeaders::new()).unwrap();

    assert_eq!(offset.value(), "0");
    assert_eq!(transport.published("prices").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_produce_inside_a_runtime() {
    let (transport, broker) = setup();
    let producer = broker
        .producer(Arc::new(Endpoint::new("prices", serializer())))
        .unwrap();

    producer.produce(&update(), MessageHeaders::new()).unwrap();
    producer.produce(&update(), MessageHeaders::new()).unwrap();

    assert_eq!(transport.published("prices").len(), 2);
}

#[tokio::test]
async fn blocking_produce_on_a_current_thread_runtime_is_refused() {
    let (transport, broker) = setup();
    let producer = broker
        .producer(Arc::new(Endpoint::new("prices", serializer())))
        .unwrap();

    let err = producer
        .produce(&update(), MessageHeaders::new())
        .unwrap_err();

    assert!(matches!(err, IntegrationError::BlockingUnsupported));
    assert!(err.is_configuration_error());
    assert!(transport.published("prices").is_empty());
}

#[test]
fn invalid_endpoints_are_rejected() {
    let (_transport, broker) = setup();

    let err = broker
        .producer(Arc::new(Endpoint::new("prices", serializer()).with_chunk_size(0)))
        .unwrap_err();

    assert!(err.is_configuration_error());
}
