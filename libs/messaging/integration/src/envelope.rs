//! In-flight message representation
//!
//! An [`Envelope`] is what the transport hands over: raw bytes, headers and
//! the record position. [`DecodedMessage`] is the first interpretation of
//! it, telling chunks, failed-message wrappers and plain messages apart.

use crate::chunk::MessageChunk;
use crate::message::{header_names, Message, MessageHeaders, Offset};
use crate::serialization::MessageSerializer;
use crate::{IntegrationError, Result};
use std::sync::Arc;

/// Raw record as produced to or received from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Serialized payload; `None` for tombstones
    pub payload: Option<Vec<u8>>,
    pub headers: MessageHeaders,
    /// Name of the endpoint the record belongs to
    pub source: String,
    /// Position assigned by the transport, if already known
    pub offset: Option<Offset>,
}

impl Envelope {
    pub fn new(source: impl Into<String>, payload: Vec<u8>, headers: MessageHeaders) -> Self {
        Self {
            payload: Some(payload),
            headers,
            source: source.into(),
            offset: None,
        }
    }

    pub fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }
}

/// A message together with the processing attempts that already failed
#[derive(Debug, Clone)]
pub struct FailedMessage {
    pub message: Arc<dyn Message>,
    pub failed_attempts: u32,
}

/// Interpretation of a received record
#[derive(Debug)]
pub enum DecodedMessage {
    /// A complete message seen for the first time
    Message(Arc<dyn Message>),
    /// One part of a chunked message
    Chunk(MessageChunk),
    /// A message re-produced after failed attempts
    Failed(FailedMessage),
}

impl DecodedMessage {
    /// Decode a record's payload according to its headers
    pub fn decode(
        payload: Option<&[u8]>,
        headers: &MessageHeaders,
        serializer: &dyn MessageSerializer,
    ) -> Result<Self> {
        if let Some(chunk) = MessageChunk::from_headers(headers, payload)? {
            return Ok(DecodedMessage::Chunk(chunk));
        }

        let payload = payload
            .ok_or_else(|| IntegrationError::serialization("record has no payload"))?;
        let message = serializer.deserialize(payload, headers)?;

        match headers.get_parsed::<u32>(header_names::FAILED_ATTEMPTS) {
            None => Ok(DecodedMessage::Message(message)),
            Some(Ok(failed_attempts)) => Ok(DecodedMessage::Failed(FailedMessage {
                message,
                failed_attempts,
            })),
            Some(Err(e)) => Err(IntegrationError::serialization(format!(
                "invalid '{}' header: {}",
                header_names::FAILED_ATTEMPTS,
                e
            ))),
        }
    }

    /// Split into the message and its failed attempts.
    ///
    /// Returns `None` for chunks, which carry no message until joined.
    pub fn into_message(self) -> Option<(Arc<dyn Message>, u32)> {
        match self {
            DecodedMessage::Message(message) => Some((message, 0)),
            DecodedMessage::Failed(failed) => Some((failed.message, failed.failed_attempts)),
            DecodedMessage::Chunk(_) => None,
        }
    }
}
