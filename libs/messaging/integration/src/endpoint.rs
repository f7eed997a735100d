//! Endpoint descriptors
//!
//! An endpoint names a logical source or destination and carries everything a
//! transport needs to reach it: the client configuration, the serializer and
//! the chunking and batching settings.

use crate::serialization::MessageSerializer;
use crate::{IntegrationError, Result};
use integration_config::{defaults, EndpointSettings};
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Canonical transport client configuration.
///
/// Backed by a sorted map so that two configurations built independently,
/// in any insertion order, compare and hash equal when their settings match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientConfig(BTreeMap<String, String>);

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a setting (builder style)
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for ClientConfig {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for ClientConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        )
    }
}

/// Outbound chunking settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    /// Maximum payload bytes per produced record
    pub size: usize,
}

/// Immutable descriptor of a logical message source or destination
#[derive(Clone)]
pub struct Endpoint {
    name: String,
    serializer: Arc<dyn MessageSerializer>,
    client_config: ClientConfig,
    chunking: Option<ChunkSettings>,
    batch_size: usize,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, serializer: Arc<dyn MessageSerializer>) -> Self {
        Self {
            name: name.into(),
            serializer,
            client_config: ClientConfig::new(),
            chunking: None,
            batch_size: defaults::consumer::BATCH_SIZE,
        }
    }

    /// Build an endpoint from its configuration file entry
    pub fn from_settings(
        name: impl Into<String>,
        settings: &EndpointSettings,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Self {
        let mut endpoint = Self::new(name, serializer)
            .with_client_config(ClientConfig::from(settings.client.clone()));
        if let Some(size) = settings.chunk_size {
            endpoint = endpoint.with_chunk_size(size);
        }
        if let Some(batch_size) = settings.batch_size {
            endpoint = endpoint.with_batch_size(batch_size);
        }
        endpoint
    }

    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunking = Some(ChunkSettings { size });
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serializer(&self) -> &dyn MessageSerializer {
        self.serializer.as_ref()
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.client_config
    }

    pub fn chunking(&self) -> Option<ChunkSettings> {
        self.chunking
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Check the endpoint before any client is created for it
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(IntegrationError::invalid_config(
                "Endpoint name must not be empty",
            ));
        }
        if let Some(ChunkSettings { size: 0 }) = self.chunking {
            return Err(IntegrationError::invalid_config(format!(
                "Endpoint '{}' has a chunk size of 0",
                self.name
            )));
        }
        if self.batch_size == 0 {
            return Err(IntegrationError::invalid_config(format!(
                "Endpoint '{}' has a batch size of 0",
                self.name
            )));
        }
        Ok(())
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("serializer", &self.serializer)
            .field("client_config", &self.client_config)
            .field("chunking", &self.chunking)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
