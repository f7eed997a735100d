//! Inbound consumer loop
//!
//! A [`Consumer`] owns one native consumer client and feeds its batches to a
//! [`ReceiveHandler`]. The handler's [`BatchDisposition`] decides whether the
//! batch offsets are committed, rolled back for redelivery, or left in flight.

use crate::broker::ConsumerClient;
use crate::endpoint::Endpoint;
use crate::envelope::Envelope;
use crate::message::Offset;
use crate::{IntegrationError, Result};
use integration_config::defaults;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What to do with a processed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchDisposition {
    Commit(Vec<Offset>),
    Rollback(Vec<Offset>),
    /// Neither commit nor roll back; the records stay in flight
    Hold,
}

/// Processes received batches
pub trait ReceiveHandler: Send {
    fn on_batch(&mut self, batch: Vec<Envelope>) -> BatchDisposition;
}

impl<F> ReceiveHandler for F
where
    F: FnMut(Vec<Envelope>) -> BatchDisposition + Send,
{
    fn on_batch(&mut self, batch: Vec<Envelope>) -> BatchDisposition {
        self(batch)
    }
}

/// Counters reported when a consumer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub batches: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub held: u64,
}

pub struct Consumer {
    endpoint: Arc<Endpoint>,
    client: Box<dyn ConsumerClient>,
    handler: Option<Box<dyn ReceiveHandler>>,
    redelivery_delay: Duration,
}

impl Consumer {
    pub(crate) fn new(endpoint: Arc<Endpoint>, client: Box<dyn ConsumerClient>) -> Self {
        Self {
            endpoint,
            client,
            handler: None,
            redelivery_delay: Duration::from_millis(defaults::consumer::REDELIVERY_DELAY_MS),
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Attach the batch handler; replaces any previous one
    pub fn on_received(&mut self, handler: impl ReceiveHandler + 'static) -> &mut Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Pause after a rollback before receiving again
    pub fn set_redelivery_delay(&mut self, delay: Duration) -> &mut Self {
        self.redelivery_delay = delay;
        self
    }

    /// Receive and dispatch batches until `shutdown` turns true or the source
    /// is exhausted.
    ///
    /// Fails with [`IntegrationError::NoReceiveHandler`] without touching the
    /// transport if no handler is attached.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<ConsumerStats> {
        let mut handler = self
            .handler
            .take()
            .ok_or_else(|| IntegrationError::NoReceiveHandler {
                endpoint: self.endpoint.name().to_string(),
            })?;

        self.client.connect().await?;
        info!("Consumer connected to '{}'", self.endpoint.name());

        let mut stats = ConsumerStats::default();
        let result = self.consume(handler.as_mut(), &mut shutdown, &mut stats).await;

        let disconnected = self.client.disconnect().await;
        info!(
            "Consumer disconnected from '{}' after {} batches ({} committed, {} rolled back)",
            self.endpoint.name(),
            stats.batches,
            stats.committed,
            stats.rolled_back
        );

        result?;
        disconnected?;
        Ok(stats)
    }

    async fn consume(
        &mut self,
        handler: &mut dyn ReceiveHandler,
        shutdown: &mut watch::Receiver<bool>,
        stats: &mut ConsumerStats,
    ) -> Result<()> {
        let batch_size = self.endpoint.batch_size();

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                received = self.client.receive(batch_size) => received?,
            };

            let Some(batch) = received else {
                debug!("Source '{}' is exhausted", self.endpoint.name());
                return Ok(());
            };
            if batch.is_empty() {
                continue;
            }

            stats.batches += 1;
            let records = batch.len();
            match handler.on_batch(batch) {
                BatchDisposition::Commit(offsets) => {
                    self.client.commit(&offsets).await?;
                    stats.committed += 1;
                    debug!(
                        "Committed {} offsets for {} records from '{}'",
                        offsets.len(),
                        records,
                        self.endpoint.name()
                    );
                }
                BatchDisposition::Rollback(offsets) => {
                    self.client.rollback(&offsets).await?;
                    stats.rolled_back += 1;
                    warn!(
                        "Rolled back {} offsets on '{}'",
                        offsets.len(),
                        self.endpoint.name()
                    );

                    if self.redelivery_delay.is_zero() {
                        // The redelivered records are ready at once; let other tasks run
                        tokio::task::yield_now().await;
                    } else {
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => return Ok(()),
                            _ = tokio::time::sleep(self.redelivery_delay) => {}
                        }
                    }
                }
                BatchDisposition::Hold => {
                    stats.held += 1;
                    debug!(
                        "Holding {} records from '{}' until more arrive",
                        records,
                        self.endpoint.name()
                    );
                }
            }
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("endpoint", &self.endpoint.name())
            .field("client", &self.client)
            .field("has_handler", &self.has_handler())
            .field("redelivery_delay", &self.redelivery_delay)
            .finish()
    }
}
