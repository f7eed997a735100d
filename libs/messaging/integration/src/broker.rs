//! Transport capability traits and the broker facade
//!
//! A [`Transport`] is the binding to a concrete message broker. The core only
//! talks to it through these traits; [`Broker`] combines a transport with the
//! producer client cache and hands out [`Producer`]s and [`Consumer`]s bound
//! to endpoints.

use crate::cache::ClientCache;
use crate::consumer::Consumer;
use crate::endpoint::{ClientConfig, Endpoint};
use crate::envelope::Envelope;
use crate::message::Offset;
use crate::producer::Producer;
use crate::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// Native producer handle; expensive to create, shared through the
/// [`ClientCache`]
#[async_trait]
pub trait ProducerClient: Send + Sync + Debug {
    /// Publish a record and return the position the transport assigned
    async fn produce(&self, envelope: Envelope) -> Result<Offset>;

    /// Wait until every produced record is acknowledged
    async fn flush(&self) -> Result<()>;

    /// Release the native handle
    async fn close(&self);
}

/// Native consumer handle, owned by exactly one consumer task
#[async_trait]
pub trait ConsumerClient: Send + Debug {
    async fn connect(&mut self) -> Result<()>;

    /// Wait for up to `max` records.
    ///
    /// Returns `Ok(None)` once the source is closed and drained.
    async fn receive(&mut self, max: usize) -> Result<Option<Vec<Envelope>>>;

    /// Acknowledge processed records
    async fn commit(&mut self, offsets: &[Offset]) -> Result<()>;

    /// Hand records back to the transport for redelivery
    async fn rollback(&mut self, offsets: &[Offset]) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Factory for native clients of one broker technology
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    fn name(&self) -> &str;

    async fn create_producer_client(&self, config: &ClientConfig)
        -> Result<Arc<dyn ProducerClient>>;

    async fn create_consumer_client(&self, endpoint: &Endpoint) -> Result<Box<dyn ConsumerClient>>;
}

/// Entry point binding endpoints to a transport
#[derive(Debug, Clone)]
pub struct Broker {
    transport: Arc<dyn Transport>,
    cache: Arc<ClientCache>,
}

impl Broker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_cache(transport, Arc::new(ClientCache::new()))
    }

    /// Create a broker sharing an existing client cache
    pub fn with_cache(transport: Arc<dyn Transport>, cache: Arc<ClientCache>) -> Self {
        Self { transport, cache }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn client_cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    /// Create a producer for the endpoint.
    ///
    /// The native client is created lazily on first use and shared with
    /// every producer whose endpoint has an equal client configuration.
    pub fn producer(&self, endpoint: Arc<Endpoint>) -> Result<Producer> {
        endpoint.validate()?;
        Ok(Producer::new(
            endpoint,
            self.transport.clone(),
            self.cache.clone(),
        ))
    }

    /// Create a consumer for the endpoint; a receive handler must be attached
    /// before it runs
    pub async fn consumer(&self, endpoint: Arc<Endpoint>) -> Result<Consumer> {
        endpoint.validate()?;
        let client = self.transport.create_consumer_client(&endpoint).await?;
        Ok(Consumer::new(endpoint, client))
    }

    /// Flush and release every cached producer client
    pub async fn shutdown(&self) -> Result<()> {
        info!(
            "Shutting down {} broker ({} cached producer clients)",
            self.transport.name(),
            self.cache.len()
        );
        self.cache.dispose_all().await
    }
}
