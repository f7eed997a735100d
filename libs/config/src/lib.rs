//! # Broker Integration Configuration
//!
//! Configuration loading and shared defaults for the broker integration
//! layer. Endpoints, inbound bindings and their error policies are declared
//! in TOML and can be overridden through `BROKER__`-prefixed environment
//! variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use integration_config::{defaults, load_config};
//!
//! let config = load_config(None).expect("config/integration.toml");
//! for binding in &config.inbound {
//!     println!("{} x{}", binding.endpoint, binding.consumers);
//! }
//! let flush = defaults::producer::FLUSH_TIMEOUT;
//! # let _ = flush;
//! ```

pub mod defaults;
pub mod settings;

// Re-export commonly used types
pub use settings::{
    load_config, EndpointSettings, ErrorPolicySettings, InboundBindingSettings, IntegrationConfig,
};
