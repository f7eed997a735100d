//! Application bus seam
//!
//! The connector delivers decoded batches to a [`MessageBus`]. Every message
//! is wrapped in an [`InboundMessage`] that remembers where it came from.

use crate::endpoint::Endpoint;
use crate::message::{Message, MessageHeaders, Offset};
use crate::HandlerError;
use std::sync::Arc;

/// A received message together with its transport metadata
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub endpoint: Arc<Endpoint>,
    pub message: Arc<dyn Message>,
    pub headers: MessageHeaders,
    /// Attempts that failed before this delivery
    pub failed_attempts: u32,
    /// Offsets of every record the message was read from
    pub offsets: Vec<Offset>,
}

impl InboundMessage {
    /// Borrow the message as `T` if it is of that type
    pub fn message_as<T: Message + 'static>(&self) -> Option<&T> {
        self.message.downcast_ref::<T>()
    }
}

/// What the bus receives for each inbound message
#[derive(Debug, Clone)]
pub enum BusMessage {
    Inbound(InboundMessage),
    /// The bare message, published next to its wrapper when unwrapping is on
    Unwrapped(Arc<dyn Message>),
}

impl BusMessage {
    pub fn message(&self) -> &Arc<dyn Message> {
        match self {
            BusMessage::Inbound(inbound) => &inbound.message,
            BusMessage::Unwrapped(message) => message,
        }
    }

    pub fn as_inbound(&self) -> Option<&InboundMessage> {
        match self {
            BusMessage::Inbound(inbound) => Some(inbound),
            BusMessage::Unwrapped(_) => None,
        }
    }
}

/// Internal application bus
pub trait MessageBus: Send + Sync {
    /// Deliver a batch; an error fails the whole batch
    fn publish(&self, messages: &[BusMessage]) -> Result<(), HandlerError>;
}

impl<F> MessageBus for F
where
    F: Fn(&[BusMessage]) -> Result<(), HandlerError> + Send + Sync,
{
    fn publish(&self, messages: &[BusMessage]) -> Result<(), HandlerError> {
        self(messages)
    }
}
