//! Outbound producer
//!
//! A [`Producer`] is a cheap logical handle bound to one endpoint. The native
//! client behind it comes from the broker's [`ClientCache`] and is shared
//! with every other producer on an equal client configuration.

use crate::broker::{ProducerClient, Transport};
use crate::cache::ClientCache;
use crate::chunk::MessageChunk;
use crate::endpoint::{ChunkSettings, Endpoint};
use crate::envelope::Envelope;
use crate::message::{header_names, Message, MessageHeaders, Offset};
use crate::{IntegrationError, Result};
use std::future::Future;
use tokio::runtime::RuntimeFlavor;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Producer {
    endpoint: Arc<Endpoint>,
    transport: Arc<dyn Transport>,
    cache: Arc<ClientCache>,
}

impl Producer {
    pub(crate) fn new(
        endpoint: Arc<Endpoint>,
        transport: Arc<dyn Transport>,
        cache: Arc<ClientCache>,
    ) -> Self {
        Self {
            endpoint,
            transport,
            cache,
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// The shared native client, created on first use
    pub async fn client(&self) -> Result<Arc<dyn ProducerClient>> {
        let config = self.endpoint.client_config();
        self.cache
            .get_or_create(config, || self.transport.create_producer_client(config))
            .await
    }

    /// Serialize and publish a message.
    ///
    /// Returns the offset of the last record written, which for a chunked
    /// message is its final chunk.
    pub async fn produce_async(
        &self,
        message: &dyn Message,
        mut headers: MessageHeaders,
    ) -> Result<Offset> {
        let payload = self
            .endpoint
            .serializer()
            .serialize(message, &mut headers)?;
        self.produce_raw(payload, headers).await
    }

    /// Publish a message carrying its failed attempts
    pub async fn produce_failed_async(
        &self,
        message: &dyn Message,
        mut headers: MessageHeaders,
        failed_attempts: u32,
    ) -> Result<Offset> {
        headers.set(header_names::FAILED_ATTEMPTS, failed_attempts);
        self.produce_async(message, headers).await
    }

    /// Publish an already serialized payload, chunking it if the endpoint
    /// asks for it
    pub async fn produce_raw(&self, payload: Vec<u8>, headers: MessageHeaders) -> Result<Offset> {
        let client = self.client().await?;
        let source = self.endpoint.name();

        match self.endpoint.chunking() {
            Some(ChunkSettings { size }) if payload.len() > size => {
                let message_id = Uuid::new_v4().to_string();
                let chunks = MessageChunk::split(&message_id, &payload, size);
                let count = chunks.len();

                let mut last = None;
                for chunk in chunks {
                    let mut chunk_headers = headers.clone();
                    chunk.write_headers(&mut chunk_headers);
                    last = Some(
                        client
                            .produce(Envelope::new(source, chunk.content, chunk_headers))
                            .await?,
                    );
                }

                debug!(
                    "Produced message {} to '{}' in {} chunks",
                    message_id, source, count
                );
                last.ok_or_else(|| IntegrationError::invalid_chunk("payload produced no chunks"))
            }
            _ => {
                let offset = client.produce(Envelope::new(source, payload, headers)).await?;
                debug!("Produced message to '{}' at {}", source, offset);
                Ok(offset)
            }
        }
    }

    /// Blocking variant of [`Producer::produce_async`].
    ///
    /// Inside a tokio runtime this requires the multi-threaded scheduler; on a
    /// current-thread runtime it fails with
    /// [`IntegrationError::BlockingUnsupported`].
    pub fn produce(&self, message: &dyn Message, headers: MessageHeaders) -> Result<Offset> {
        block_on(self.produce_async(message, headers))
    }

    /// Blocking variant of [`Producer::produce_failed_async`]
    pub fn produce_failed(
        &self,
        message: &dyn Message,
        headers: MessageHeaders,
        failed_attempts: u32,
    ) -> Result<Offset> {
        block_on(self.produce_failed_async(message, headers, failed_attempts))
    }

    /// Flush and release the shared native client.
    ///
    /// Other producers on the same configuration transparently create a new
    /// one on their next produce.
    pub async fn dispose(&self) -> Result<bool> {
        self.cache.dispose(self.endpoint.client_config()).await
    }
}

fn block_on<T, F>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Err(IntegrationError::BlockingUnsupported),
            _ => tokio::task::block_in_place(|| handle.block_on(future)),
        },
        Err(_) => futures::executor::block_on(future),
    }
}
