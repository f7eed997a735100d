//! # Broker Integration
//!
//! Moves messages between an external message broker and an internal
//! application bus.
//!
//! ## Architecture
//!
//! ```text
//! Outbound: message → MessageSerializer → chunk split → cached ProducerClient → Transport
//! Inbound:  Transport → ConsumerClient → InboundRelay → ChunkBuffer → ErrorPolicyChain → MessageBus
//!                                           └─ commit / rollback ─┘
//! ```
//!
//! - [`Broker`] binds [`Endpoint`]s to a [`Transport`] and shares native
//!   producer clients through the [`ClientCache`]
//! - [`InboundConnector`] runs one task per consumer, delivering batches to
//!   the [`MessageBus`] under an [`ErrorPolicyChain`]
//! - [`ChunkBuffer`] joins chunked payloads, aligned with commit boundaries
//!
//! ## Usage
//!
//! ```rust
//! use broker_integration::test_utils::{MemoryTransport, RecordingBus};
//! use broker_integration::{
//!     Broker, Endpoint, ErrorPolicy, ErrorPolicyChain, InboundConnector, InboundSettings,
//!     JsonMessageSerializer, Message, MessageHeaders, MessageTypeRegistry,
//! };
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct OrderPlaced {
//!     id: u64,
//! }
//! impl Message for OrderPlaced {}
//!
//! # tokio_test::block_on(async {
//! let serializer = Arc::new(JsonMessageSerializer::new(
//!     MessageTypeRegistry::new().with::<OrderPlaced>("order-placed"),
//! ));
//! let endpoint = Arc::new(Endpoint::new("orders", serializer));
//! let transport = Arc::new(MemoryTransport::new());
//! let broker = Arc::new(Broker::new(transport.clone()));
//!
//! broker
//!     .producer(endpoint.clone())?
//!     .produce_async(&OrderPlaced { id: 1 }, MessageHeaders::new())
//!     .await?;
//!
//! let bus = Arc::new(RecordingBus::new());
//! let mut connector = InboundConnector::new(broker.clone(), bus.clone());
//! connector
//!     .bind(
//!         endpoint,
//!         Some(ErrorPolicyChain::new([ErrorPolicy::retry(3)])),
//!         InboundSettings::default(),
//!     )
//!     .await?;
//!
//! transport.close("orders");
//! connector.start().join().await?;
//! assert_eq!(bus.inbound().len(), 1);
//! # Ok::<(), broker_integration::IntegrationError>(())
//! # }).unwrap();
//! ```

pub mod broker;
pub mod bus;
pub mod cache;
pub mod chunk;
pub mod connector;
pub mod consumer;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod error_handling;
pub mod message;
pub mod producer;
pub mod serialization;
pub mod test_utils;

pub use broker::{Broker, ConsumerClient, ProducerClient, Transport};
pub use bus::{BusMessage, InboundMessage, MessageBus};
pub use cache::ClientCache;
pub use chunk::{ChunkBuffer, JoinedMessage, MessageChunk};
pub use connector::{ConnectorHandle, InboundConnector, InboundSettings};
pub use consumer::{BatchDisposition, Consumer, ConsumerStats, ReceiveHandler};
pub use endpoint::{ChunkSettings, ClientConfig, Endpoint};
pub use envelope::{DecodedMessage, Envelope, FailedMessage};
pub use error::{HandlerError, IntegrationError, Result};
pub use error_handling::{
    ErrorPolicy, ErrorPolicyChain, FailureContext, HandleOutcome, PolicyKind, UnhandledError,
};
pub use message::{header_names, Message, MessageHeaders, Offset};
pub use producer::Producer;
pub use serialization::{JsonMessageSerializer, MessageSerializer, MessageTypeRegistry};
