//! Producer client cache
//!
//! Native producer clients are keyed by their canonical [`ClientConfig`], so
//! every logical producer built on an equal configuration shares one handle.
//! Removal from the map is the single point that decides which caller owns
//! the disposal; only that caller flushes and closes the handle.

use crate::broker::ProducerClient;
use crate::endpoint::ClientConfig;
use crate::{IntegrationError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use integration_config::defaults;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ClientCache {
    handles: DashMap<ClientConfig, Arc<dyn ProducerClient>>,
    flush_timeout: Duration,
}

impl Default for ClientCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCache {
    pub fn new() -> Self {
        Self::with_flush_timeout(defaults::producer::FLUSH_TIMEOUT)
    }

    pub fn with_flush_timeout(flush_timeout: Duration) -> Self {
        Self {
            handles: DashMap::new(),
            flush_timeout,
        }
    }

    /// Return the cached client for `config`, creating it if needed.
    ///
    /// Creation runs outside the map lock; if two callers race, the first
    /// insert wins and the loser's client is closed.
    pub async fn get_or_create<F, Fut>(
        &self,
        config: &ClientConfig,
        create: F,
    ) -> Result<Arc<dyn ProducerClient>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn ProducerClient>>>,
    {
        if let Some(handle) = self.handles.get(config) {
            return Ok(handle.value().clone());
        }

        let created = create().await?;
        let (handle, raced) = match self.handles.entry(config.clone()) {
            Entry::Occupied(existing) => (existing.get().clone(), true),
            Entry::Vacant(vacant) => {
                debug!("Created producer client for {:?}", config);
                (vacant.insert(created.clone()).value().clone(), false)
            }
        };

        if raced {
            created.close().await;
        }
        Ok(handle)
    }

    /// Flush and release the client cached for `config`.
    ///
    /// Returns `false` when no client was cached, including when a
    /// concurrent call already disposed of it.
    pub async fn dispose(&self, config: &ClientConfig) -> Result<bool> {
        let Some((_, handle)) = self.handles.remove(config) else {
            return Ok(false);
        };

        let flushed = self.flush(&handle).await;
        handle.close().await;
        debug!("Disposed producer client for {:?}", config);
        flushed.map(|_| true)
    }

    /// Dispose of every cached client
    pub async fn dispose_all(&self) -> Result<()> {
        let configs: Vec<ClientConfig> = self.handles.iter().map(|e| e.key().clone()).collect();
        let mut first_error = None;
        for config in &configs {
            if let Err(e) = self.dispose(config).await {
                first_error.get_or_insert(e);
            }
        }
        if !configs.is_empty() {
            info!("Disposed {} producer clients", configs.len());
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn flush(&self, handle: &Arc<dyn ProducerClient>) -> Result<()> {
        match tokio::time::timeout(self.flush_timeout, handle.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Failed to flush producer client: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Producer client flush did not complete within {:?}",
                    self.flush_timeout
                );
                Err(IntegrationError::Timeout(self.flush_timeout))
            }
        }
    }

    pub fn contains(&self, config: &ClientConfig) -> bool {
        self.handles.contains_key(config)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::message::Offset;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingClient {
        flushes: AtomicUsize,
        closes: AtomicUsize,
        hang_on_flush: bool,
    }

    #[async_trait]
    impl ProducerClient for CountingClient {
        async fn produce(&self, _envelope: Envelope) -> Result<Offset> {
            Ok(Offset::new("test", 0))
        }

        async fn flush(&self) -> Result<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.hang_on_flush {
                futures::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(brokers: &str) -> ClientConfig {
        ClientConfig::new().with("brokers", brokers)
    }

    #[tokio::test]
    async fn test_disposal_releases_exactly_once() {
        let cache = Arc::new(ClientCache::new());
        let client = Arc::new(CountingClient::default());
        let handle: Arc<dyn ProducerClient> = client.clone();
        cache
            .get_or_create(&config("a"), || async move { Ok(handle) })
            .await
            .unwrap();

        let (a, b) = (config("a"), config("a"));
        let (first, second) = tokio::join!(cache.dispose(&a), cache.dispose(&b));

        assert_ne!(first.unwrap(), second.unwrap());
        assert_eq!(client.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_is_bounded() {
        let cache = ClientCache::with_flush_timeout(Duration::from_secs(10));
        let client = Arc::new(CountingClient {
            hang_on_flush: true,
            ..Default::default()
        });
        let handle: Arc<dyn ProducerClient> = client.clone();
        cache
            .get_or_create(&config("slow"), || async move { Ok(handle) })
            .await
            .unwrap();

        let err = cache.dispose(&config("slow")).await.unwrap_err();

        assert!(matches!(err, IntegrationError::Timeout(_)));
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&config("slow")));
    }

    #[tokio::test]
    async fn test_creation_failure_is_not_cached() {
        let cache = ClientCache::new();

        let result = cache
            .get_or_create(&config("down"), || async {
                Err(IntegrationError::transport("connection refused"))
            })
            .await;

        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
