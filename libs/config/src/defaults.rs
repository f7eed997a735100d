//! Default values shared by the configuration layer and the integration core.

/// Producer-side defaults
pub mod producer {
    use std::time::Duration;

    /// Bounded wait for in-flight sends when a cached producer handle is disposed
    pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Consumer-side defaults
pub mod consumer {
    /// Records requested from the transport per receive call
    pub const BATCH_SIZE: usize = 1;

    /// Consumer instances per inbound binding
    pub const CONSUMERS: usize = 1;

    /// Pause before polling again after a batch was rolled back (milliseconds)
    pub const REDELIVERY_DELAY_MS: u64 = 50;
}

/// Configuration file locations
pub mod paths {
    /// Default configuration file
    pub const CONFIG_FILE: &str = "config/integration.toml";

    /// Prefix for environment variable overrides
    pub const ENV_PREFIX: &str = "BROKER";

    /// Separator between nested keys in environment variable overrides
    pub const ENV_SEPARATOR: &str = "__";
}
