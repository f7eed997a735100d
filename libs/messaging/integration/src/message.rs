//! Message, header and offset model shared by producers and consumers.

use std::any::Any;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;

/// Header names shared by every producer and consumer implementation.
///
/// These are part of the wire contract: chunked and failed messages are only
/// interoperable if both sides agree on them byte for byte.
pub mod header_names {
    /// Registered type name of the serialized message
    pub const MESSAGE_TYPE: &str = "x-message-type";
    /// Identifier shared by all chunks of one logical message
    pub const MESSAGE_ID: &str = "x-message-id";
    /// Zero-based index of a chunk
    pub const CHUNK_ID: &str = "x-chunk-id";
    /// Total number of chunks of the logical message
    pub const CHUNKS_COUNT: &str = "x-chunks-count";
    /// Failed processing attempts carried by a re-produced message
    pub const FAILED_ATTEMPTS: &str = "x-failed-attempts";
}

/// Helper trait giving access to the concrete type behind a `dyn Message`
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An application message moved across the broker
pub trait Message: AsAny + Debug + Send + Sync {}

impl<'a> dyn Message + 'a {
    /// Check whether the message is of type `T`
    pub fn is<T: Message + 'static>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrow the message as `T` if it is of that type
    pub fn downcast_ref<T: Message + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Ordered header collection.
///
/// Keys are unique; setting an existing key replaces its value in place so
/// insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    entries: Vec<(String, String)>,
}

impl MessageHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a header
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style variant of [`MessageHeaders::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Get a header parsed into `T`; `None` if absent
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<Result<T, T::Err>> {
        self.get(key).map(str::parse)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for MessageHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = MessageHeaders::new();
        for (key, value) in iter {
            headers.set(key, value);
        }
        headers
    }
}

/// Opaque position of a record in its source stream.
///
/// The key identifies the stream (e.g. `topic[partition]`), the value the
/// position inside it. Only the transport interprets either part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Offset {
    key: String,
    value: String,
}

impl Offset {
    pub fn new(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.value)
    }
}
