//! Integration Configuration Module
//!
//! Loads endpoint definitions and inbound bindings from TOML files with
//! environment variable overrides. Transport client settings are kept as a
//! flat string map; their meaning belongs to the transport binding.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Top-level integration configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct IntegrationConfig {
    /// Endpoint definitions keyed by endpoint name
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointSettings>,

    /// Inbound bindings (endpoint → application bus)
    #[serde(default)]
    pub inbound: Vec<InboundBindingSettings>,
}

/// Settings for a single endpoint
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct EndpointSettings {
    /// Transport-specific client configuration (e.g. bootstrap servers, group id)
    #[serde(default)]
    pub client: BTreeMap<String, String>,

    /// Split outbound payloads larger than this many bytes into chunks
    pub chunk_size: Option<usize>,

    /// Records requested per receive call
    pub batch_size: Option<usize>,
}

/// Binding of an endpoint to the application bus
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InboundBindingSettings {
    /// Name of the endpoint to consume from
    pub endpoint: String,

    /// Number of parallel consumer instances
    #[serde(default = "default_consumers")]
    pub consumers: usize,

    /// Publish the bare message next to its inbound wrapper
    #[serde(default)]
    pub unwrap_messages: bool,

    /// Ordered error policy chain
    #[serde(default)]
    pub error_policies: Vec<ErrorPolicySettings>,

    /// Pause after a rollback before polling again
    pub redelivery_delay_ms: Option<u64>,
}

/// Declarative error policy
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorPolicySettings {
    /// Re-invoke the handler up to `max_attempts` failed attempts
    Retry { max_attempts: u32 },
    /// Swallow the failure
    Skip { max_failed_attempts: Option<u32> },
    /// Re-produce the failed message to another endpoint
    Move {
        endpoint: String,
        max_failed_attempts: Option<u32>,
    },
}

fn default_consumers() -> usize {
    defaults::consumer::CONSUMERS
}

impl IntegrationConfig {
    /// Load configuration from a TOML file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(defaults::paths::CONFIG_FILE));

        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix(defaults::paths::ENV_PREFIX)
                    .separator(defaults::paths::ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to build configuration from {:?}", path))?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        info!(
            "Loaded integration config from {:?}: {} endpoints, {} inbound bindings",
            path,
            config.endpoints.len(),
            config.inbound.len()
        );
        Ok(config)
    }

    /// Parse configuration from an inline TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Failed to parse TOML configuration")
    }

    /// Get settings for a specific endpoint
    pub fn endpoint(&self, name: &str) -> Option<&EndpointSettings> {
        self.endpoints.get(name)
    }

    /// Expand environment variables in client configuration values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for (name, endpoint) in &mut self.endpoints {
            for (key, value) in endpoint.client.iter_mut() {
                let expanded = shellexpand::env(value.as_str())
                    .with_context(|| {
                        format!("Failed to expand '{}' for endpoint '{}'", key, name)
                    })?
                    .into_owned();
                if expanded != *value {
                    debug!("Expanded client setting '{}' for endpoint '{}'", key, name);
                    *value = expanded;
                }
            }
        }
        Ok(())
    }

    /// Check that every reference resolves and every size is usable
    pub fn validate(&self) -> Result<()> {
        for (name, endpoint) in &self.endpoints {
            if name.trim().is_empty() {
                bail!("Endpoint names must not be empty");
            }
            if endpoint.chunk_size == Some(0) {
                bail!("Endpoint '{}' has chunk_size = 0", name);
            }
            if endpoint.batch_size == Some(0) {
                bail!("Endpoint '{}' has batch_size = 0", name);
            }
        }

        for binding in &self.inbound {
            if !self.endpoints.contains_key(&binding.endpoint) {
                bail!(
                    "Inbound binding references unknown endpoint '{}'",
                    binding.endpoint
                );
            }
            if binding.consumers == 0 {
                bail!(
                    "Inbound binding for '{}' must have at least one consumer",
                    binding.endpoint
                );
            }
            for policy in &binding.error_policies {
                if let ErrorPolicySettings::Move { endpoint, .. } = policy {
                    if !self.endpoints.contains_key(endpoint) {
                        bail!(
                            "Move policy on '{}' references unknown endpoint '{}'",
                            binding.endpoint,
                            endpoint
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

/// Convenience function to load, expand and validate configuration
pub fn load_config(path: Option<&Path>) -> Result<IntegrationConfig> {
    let mut config = IntegrationConfig::load(path)?;
    config.expand_env_vars()?;
    config.validate()?;
    Ok(config)
}
