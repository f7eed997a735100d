use std::time::Duration;

/// Error raised by application code while handling inbound messages.
///
/// Boxed so that error policies can filter on the concrete type through
/// downcasting.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for integration operations
pub type Result<T> = std::result::Result<T, IntegrationError>;

#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("A batch was received but no handler is attached to the consumer of endpoint '{endpoint}'")]
    NoReceiveHandler { endpoint: String },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Unknown message type '{0}'")]
    UnknownMessageType(String),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Producer client for endpoint '{0}' is closed")]
    ProducerClosed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Blocking produce needs a multi-threaded tokio runtime; use the async variant")]
    BlockingUnsupported,

    #[error("Consumer task failed: {0}")]
    ConsumerTask(String),
}

impl IntegrationError {
    /// Configuration errors are fatal and never retried
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            IntegrationError::InvalidConfig(_)
                | IntegrationError::NoReceiveHandler { .. }
                | IntegrationError::BlockingUnsupported
        )
    }

    /// Check if this error originates from the transport binding
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            IntegrationError::Transport(_)
                | IntegrationError::ProducerClosed(_)
                | IntegrationError::Timeout(_)
        )
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        IntegrationError::InvalidConfig(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        IntegrationError::Serialization(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        IntegrationError::Transport(msg.into())
    }

    /// Create an invalid chunk error
    pub fn invalid_chunk(msg: impl Into<String>) -> Self {
        IntegrationError::InvalidChunk(msg.into())
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(err: serde_json::Error) -> Self {
        IntegrationError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = IntegrationError::NoReceiveHandler {
            endpoint: "orders".to_string(),
        };
        assert!(missing.is_configuration_error());
        assert!(!missing.is_transport_error());
        assert!(missing.to_string().contains("'orders'"));

        let timeout = IntegrationError::Timeout(Duration::from_secs(10));
        assert!(timeout.is_transport_error());
        assert!(!timeout.is_configuration_error());

        let closed = IntegrationError::ProducerClosed("orders".to_string());
        assert!(closed.is_transport_error());
    }

    #[test]
    fn test_serde_errors_convert() {
        let err: IntegrationError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, IntegrationError::Serialization(_)));
        assert!(!err.is_transport_error());
    }
}
