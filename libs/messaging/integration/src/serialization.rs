//! Message serialization
//!
//! The bundled [`JsonMessageSerializer`] resolves concrete message types
//! through a [`MessageTypeRegistry`] populated at configuration time. The
//! registered name travels in the `x-message-type` header.

use crate::message::{header_names, Message, MessageHeaders};
use crate::{IntegrationError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Converts messages to and from wire payloads
pub trait MessageSerializer: Send + Sync + Debug {
    /// Serialize the message; may add headers needed to deserialize it
    fn serialize(&self, message: &dyn Message, headers: &mut MessageHeaders) -> Result<Vec<u8>>;

    /// Deserialize a payload using the headers it was received with
    fn deserialize(&self, payload: &[u8], headers: &MessageHeaders) -> Result<Arc<dyn Message>>;
}

type EncodeFn = fn(&dyn Message) -> Result<Vec<u8>>;
type DecodeFn = fn(&[u8]) -> Result<Arc<dyn Message>>;

#[derive(Debug)]
struct Registration {
    name: String,
    encode: EncodeFn,
    decode: DecodeFn,
}

fn encode_json<T: Message + Serialize + 'static>(message: &dyn Message) -> Result<Vec<u8>> {
    let typed = message.downcast_ref::<T>().ok_or_else(|| {
        IntegrationError::serialization(format!(
            "message is not a {}",
            std::any::type_name::<T>()
        ))
    })?;
    Ok(serde_json::to_vec(typed)?)
}

fn decode_json<T: Message + DeserializeOwned + 'static>(payload: &[u8]) -> Result<Arc<dyn Message>> {
    let message: T = serde_json::from_slice(payload)?;
    Ok(Arc::new(message))
}

/// Maps message types to their wire names and JSON codecs
#[derive(Debug, Default)]
pub struct MessageTypeRegistry {
    by_type: HashMap<TypeId, Arc<Registration>>,
    by_name: HashMap<String, Arc<Registration>>,
}

impl MessageTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name`, replacing any previous registration of
    /// either the type or the name
    pub fn register<T>(&mut self, name: impl Into<String>) -> &mut Self
    where
        T: Message + Serialize + DeserializeOwned + 'static,
    {
        let registration = Arc::new(Registration {
            name: name.into(),
            encode: encode_json::<T>,
            decode: decode_json::<T>,
        });
        debug!(
            "Registered message type {} as '{}'",
            std::any::type_name::<T>(),
            registration.name
        );
        self.by_name
            .insert(registration.name.clone(), registration.clone());
        self.by_type.insert(TypeId::of::<T>(), registration);
        self
    }

    /// Builder-style variant of [`MessageTypeRegistry::register`]
    pub fn with<T>(mut self, name: impl Into<String>) -> Self
    where
        T: Message + Serialize + DeserializeOwned + 'static,
    {
        self.register::<T>(name);
        self
    }

    /// Wire name of the message's concrete type
    pub fn name_of(&self, message: &dyn Message) -> Option<&str> {
        self.by_type
            .get(&Any::type_id(message.as_any()))
            .map(|r| r.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// JSON serializer backed by `serde_json`
#[derive(Debug, Clone)]
pub struct JsonMessageSerializer {
    registry: Arc<MessageTypeRegistry>,
}

impl JsonMessageSerializer {
    pub fn new(registry: MessageTypeRegistry) -> Self {
        Self::shared(Arc::new(registry))
    }

    /// Create a serializer over a registry shared with other serializers
    pub fn shared(registry: Arc<MessageTypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MessageTypeRegistry {
        &self.registry
    }
}

impl MessageSerializer for JsonMessageSerializer {
    fn serialize(&self, message: &dyn Message, headers: &mut MessageHeaders) -> Result<Vec<u8>> {
        let registration = self
            .registry
            .by_type
            .get(&Any::type_id(message.as_any()))
            .ok_or_else(|| {
                IntegrationError::UnknownMessageType(format!("{:?}", message))
            })?;

        let payload = (registration.encode)(message)?;
        headers.set(header_names::MESSAGE_TYPE, &registration.name);
        Ok(payload)
    }

    fn deserialize(&self, payload: &[u8], headers: &MessageHeaders) -> Result<Arc<dyn Message>> {
        let name = headers.get(header_names::MESSAGE_TYPE).ok_or_else(|| {
            IntegrationError::serialization(format!(
                "missing '{}' header",
                header_names::MESSAGE_TYPE
            ))
        })?;

        let registration = self
            .registry
            .by_name
            .get(name)
            .ok_or_else(|| IntegrationError::UnknownMessageType(name.to_string()))?;

        (registration.decode)(payload)
    }
}
