//! Inbound connector
//!
//! Binds endpoints to the application bus. Every bound consumer gets its own
//! relay: it decodes the batch, joins chunks, unwraps failed-message
//! wrappers and publishes under the endpoint's error policy chain. The chain
//! outcome alone decides between commit and rollback.

use crate::broker::Broker;
use crate::bus::{BusMessage, InboundMessage, MessageBus};
use crate::chunk::{strip_chunk_headers, ChunkBuffer};
use crate::consumer::{BatchDisposition, Consumer, ConsumerStats, ReceiveHandler};
use crate::endpoint::Endpoint;
use crate::envelope::{DecodedMessage, Envelope};
use crate::error_handling::{ErrorPolicy, ErrorPolicyChain};
use crate::message::Offset;
use crate::serialization::MessageSerializer;
use crate::{IntegrationError, Result};
use integration_config::{defaults, ErrorPolicySettings, InboundBindingSettings, IntegrationConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-binding consumer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSettings {
    /// Parallel consumer instances for the endpoint
    pub consumers: usize,
    /// Also publish the bare message next to its [`InboundMessage`]
    pub unwrap_messages: bool,
    pub redelivery_delay: Duration,
}

impl Default for InboundSettings {
    fn default() -> Self {
        Self {
            consumers: defaults::consumer::CONSUMERS,
            unwrap_messages: false,
            redelivery_delay: Duration::from_millis(defaults::consumer::REDELIVERY_DELAY_MS),
        }
    }
}

impl From<&InboundBindingSettings> for InboundSettings {
    fn from(binding: &InboundBindingSettings) -> Self {
        Self {
            consumers: binding.consumers,
            unwrap_messages: binding.unwrap_messages,
            redelivery_delay: binding
                .redelivery_delay_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| Self::default().redelivery_delay),
        }
    }
}

pub struct InboundConnector {
    broker: Arc<Broker>,
    bus: Arc<dyn MessageBus>,
    consumers: Vec<Consumer>,
}

impl InboundConnector {
    pub fn new(broker: Arc<Broker>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            broker,
            bus,
            consumers: Vec::new(),
        }
    }

    /// Create `settings.consumers` consumers for the endpoint, each relaying
    /// to the bus under `error_policy`.
    ///
    /// Without a chain every processing error rolls the batch back.
    pub async fn bind(
        &mut self,
        endpoint: Arc<Endpoint>,
        error_policy: Option<ErrorPolicyChain<[InboundMessage]>>,
        settings: InboundSettings,
    ) -> Result<&mut Self> {
        if settings.consumers == 0 {
            return Err(IntegrationError::invalid_config(format!(
                "Inbound binding for '{}' needs at least one consumer",
                endpoint.name()
            )));
        }

        let chain = error_policy.unwrap_or_default();
        for _ in 0..settings.consumers {
            let mut consumer = self.broker.consumer(endpoint.clone()).await?;
            consumer
                .on_received(InboundRelay {
                    endpoint: endpoint.clone(),
                    bus: self.bus.clone(),
                    chain: chain.clone(),
                    unwrap_messages: settings.unwrap_messages,
                    chunks: ChunkBuffer::new(),
                })
                .set_redelivery_delay(settings.redelivery_delay);
            self.consumers.push(consumer);
        }

        info!(
            "Bound '{}' to the bus with {} consumers and {} error policies",
            endpoint.name(),
            settings.consumers,
            chain.len()
        );
        Ok(self)
    }

    /// Bind every inbound binding of the configuration.
    ///
    /// Move policies get a producer on their destination endpoint.
    pub async fn bind_from_config(
        &mut self,
        config: &IntegrationConfig,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Result<&mut Self> {
        for binding in &config.inbound {
            let endpoint = Arc::new(endpoint_from_config(config, &binding.endpoint, &serializer)?);
            let chain = binding
                .error_policies
                .iter()
                .map(|policy| self.policy_from_settings(config, policy, &serializer))
                .collect::<Result<ErrorPolicyChain<_>>>()?;

            self.bind(endpoint, Some(chain), InboundSettings::from(binding))
                .await?;
        }
        Ok(self)
    }

    fn policy_from_settings(
        &self,
        config: &IntegrationConfig,
        settings: &ErrorPolicySettings,
        serializer: &Arc<dyn MessageSerializer>,
    ) -> Result<ErrorPolicy<[InboundMessage]>> {
        let (policy, max_failed_attempts) = match settings {
            ErrorPolicySettings::Retry { max_attempts } => (ErrorPolicy::retry(*max_attempts), None),
            ErrorPolicySettings::Skip {
                max_failed_attempts,
            } => (ErrorPolicy::skip(), *max_failed_attempts),
            ErrorPolicySettings::Move {
                endpoint,
                max_failed_attempts,
            } => {
                let destination = endpoint_from_config(config, endpoint, serializer)?;
                let producer = self.broker.producer(Arc::new(destination))?;
                (ErrorPolicy::move_to(producer), *max_failed_attempts)
            }
        };

        Ok(match max_failed_attempts {
            Some(max) => policy.max_failed_attempts(max),
            None => policy,
        })
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Spawn one task per bound consumer
    pub fn start(self) -> ConnectorHandle {
        let (shutdown, signal) = watch::channel(false);
        let tasks = self
            .consumers
            .into_iter()
            .map(|consumer| tokio::spawn(consumer.run(signal.clone())))
            .collect::<Vec<_>>();

        info!("Inbound connector started {} consumers", tasks.len());
        ConnectorHandle { shutdown, tasks }
    }
}

fn endpoint_from_config(
    config: &IntegrationConfig,
    name: &str,
    serializer: &Arc<dyn MessageSerializer>,
) -> Result<Endpoint> {
    let settings = config.endpoint(name).ok_or_else(|| {
        IntegrationError::invalid_config(format!("Endpoint '{}' is not configured", name))
    })?;
    Ok(Endpoint::from_settings(name, settings, serializer.clone()))
}

/// Running consumers of an [`InboundConnector`]
#[derive(Debug)]
pub struct ConnectorHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<Result<ConsumerStats>>>,
}

impl ConnectorHandle {
    /// Signal shutdown and wait for every consumer to finish its current
    /// batch and disconnect
    pub async fn stop(self) -> Result<Vec<ConsumerStats>> {
        let _ = self.shutdown.send(true);
        Self::join_all(self.tasks).await
    }

    /// Wait for the consumers to stop on their own (their sources closed)
    pub async fn join(self) -> Result<Vec<ConsumerStats>> {
        let ConnectorHandle { shutdown, tasks } = self;
        let stats = Self::join_all(tasks).await;
        drop(shutdown);
        stats
    }

    async fn join_all(tasks: Vec<JoinHandle<Result<ConsumerStats>>>) -> Result<Vec<ConsumerStats>> {
        let mut stats = Vec::with_capacity(tasks.len());
        let mut first_error = None;

        for task in tasks {
            match task.await {
                Ok(Ok(consumer_stats)) => stats.push(consumer_stats),
                Ok(Err(e)) => {
                    error!("Consumer stopped with error: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("Consumer task failed: {}", e);
                    first_error.get_or_insert(IntegrationError::ConsumerTask(e.to_string()));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

struct InboundRelay {
    endpoint: Arc<Endpoint>,
    bus: Arc<dyn MessageBus>,
    chain: ErrorPolicyChain<[InboundMessage]>,
    unwrap_messages: bool,
    chunks: ChunkBuffer,
}

impl InboundRelay {
    fn decode_batch(&mut self, batch: Vec<Envelope>) -> Result<Vec<InboundMessage>> {
        let serializer = self.endpoint.serializer();
        let mut messages = Vec::with_capacity(batch.len());

        for envelope in batch {
            let decoded = DecodedMessage::decode(
                envelope.payload.as_deref(),
                &envelope.headers,
                serializer,
            )?;

            let (decoded, headers, offsets) = match decoded {
                DecodedMessage::Chunk(chunk) => {
                    let Some(joined) = self
                        .chunks
                        .join_if_complete(&chunk, envelope.offset.as_ref())
                    else {
                        continue;
                    };
                    let mut headers = envelope.headers;
                    strip_chunk_headers(&mut headers);
                    let decoded = DecodedMessage::decode(Some(joined.payload.as_slice()), &headers, serializer)?;
                    (decoded, headers, joined.offsets)
                }
                decoded => (decoded, envelope.headers, envelope.offset.into_iter().collect()),
            };

            let (message, failed_attempts) = decoded
                .into_message()
                .ok_or_else(|| IntegrationError::invalid_chunk("joined payload is itself a chunk"))?;

            messages.push(InboundMessage {
                endpoint: self.endpoint.clone(),
                message,
                headers,
                failed_attempts,
                offsets,
            });
        }

        Ok(messages)
    }

    fn bus_batch(&self, messages: &[InboundMessage]) -> Vec<BusMessage> {
        let mut batch = Vec::with_capacity(messages.len() * 2);
        for inbound in messages {
            if self.unwrap_messages {
                batch.push(BusMessage::Unwrapped(inbound.message.clone()));
            }
            batch.push(BusMessage::Inbound(inbound.clone()));
        }
        batch
    }
}

impl ReceiveHandler for InboundRelay {
    fn on_batch(&mut self, batch: Vec<Envelope>) -> BatchDisposition {
        let received: Vec<Offset> = batch.iter().filter_map(|e| e.offset.clone()).collect();

        let messages = match self.decode_batch(batch) {
            Ok(messages) => messages,
            Err(e) => {
                error!(
                    "Failed to decode batch from '{}': {}",
                    self.endpoint.name(),
                    e
                );
                let mut offsets = received;
                offsets.extend(self.chunks.rollback());
                return BatchDisposition::Rollback(dedup(offsets));
            }
        };

        if messages.is_empty() {
            return BatchDisposition::Hold;
        }

        let failed_attempts = messages
            .iter()
            .map(|m| m.failed_attempts)
            .max()
            .unwrap_or_default();
        let bus_batch = self.bus_batch(&messages);
        let bus = &self.bus;
        let outcome = self
            .chain
            .try_handle(&messages[..], failed_attempts, |_| bus.publish(&bus_batch));

        let mut offsets: Vec<Offset> = messages.into_iter().flat_map(|m| m.offsets).collect();
        match outcome {
            Ok(outcome) => {
                debug!(
                    "Batch from '{}' processed ({:?})",
                    self.endpoint.name(),
                    outcome
                );
                self.chunks.commit();
                BatchDisposition::Commit(dedup(offsets))
            }
            Err(unhandled) => {
                warn!(
                    "Rolling back batch from '{}': {}",
                    self.endpoint.name(),
                    unhandled
                );
                offsets.extend(self.chunks.rollback());
                BatchDisposition::Rollback(dedup(offsets))
            }
        }
    }
}

fn dedup(offsets: Vec<Offset>) -> Vec<Offset> {
    let mut seen = HashSet::with_capacity(offsets.len());
    offsets
        .into_iter()
        .filter(|offset| seen.insert(offset.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_binding() {
        let binding = InboundBindingSettings {
            endpoint: "orders".to_string(),
            consumers: 4,
            unwrap_messages: true,
            error_policies: Vec::new(),
            redelivery_delay_ms: Some(250),
        };

        let settings = InboundSettings::from(&binding);
        assert_eq!(settings.consumers, 4);
        assert!(settings.unwrap_messages);
        assert_eq!(settings.redelivery_delay, Duration::from_millis(250));

        let defaulted = InboundSettings::from(&InboundBindingSettings {
            redelivery_delay_ms: None,
            ..binding
        });
        assert_eq!(defaulted.redelivery_delay, InboundSettings::default().redelivery_delay);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let a = Offset::new("t[0]", 1);
        let b = Offset::new("t[0]", 2);

        assert_eq!(
            dedup(vec![a.clone(), b.clone(), a.clone()]),
            vec![a, b]
        );
    }
}
