use crate::bus::InboundMessage;
use crate::chunk::strip_chunk_headers;
use crate::message::header_names;
use crate::producer::Producer;
use crate::HandlerError;
use std::error::Error;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::info;

/// Predicate over a handler error
pub type ErrorPredicate = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Action of a custom policy.
///
/// Receives the subject, the handler (so the action may invoke it again) and
/// the failure that selected the policy.
pub type CustomAction<T> = Arc<
    dyn Fn(
            &T,
            &mut dyn FnMut(&T) -> Result<(), HandlerError>,
            &FailureContext<'_>,
        ) -> Result<(), HandlerError>
        + Send
        + Sync,
>;

/// The failure a policy is being applied to
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    pub error: &'a (dyn Error + Send + Sync + 'static),
    /// Failed attempts including this one
    pub attempt: u32,
}

/// Which errors a policy applies to.
///
/// With no include rules every error matches. Exclude rules win over include
/// rules and every condition must hold.
#[derive(Clone, Default)]
pub struct ErrorFilter {
    include: Vec<ErrorPredicate>,
    exclude: Vec<ErrorPredicate>,
    conditions: Vec<ErrorPredicate>,
}

impl ErrorFilter {
    pub fn matches(&self, error: &(dyn Error + 'static)) -> bool {
        (self.include.is_empty() || self.include.iter().any(|p| p(error)))
            && !self.exclude.iter().any(|p| p(error))
            && self.conditions.iter().all(|p| p(error))
    }

    pub fn is_unrestricted(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.conditions.is_empty()
    }
}

impl Debug for ErrorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorFilter")
            .field("include", &self.include.len())
            .field("exclude", &self.exclude.len())
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Retry,
    Skip,
    Custom,
}

pub enum PolicyAction<T: ?Sized> {
    /// Invoke the handler again
    Retry,
    /// Swallow the error
    Skip,
    Custom(CustomAction<T>),
}

impl<T: ?Sized> Clone for PolicyAction<T> {
    fn clone(&self) -> Self {
        match self {
            PolicyAction::Retry => PolicyAction::Retry,
            PolicyAction::Skip => PolicyAction::Skip,
            PolicyAction::Custom(action) => PolicyAction::Custom(action.clone()),
        }
    }
}

/// A single strategy in an [`ErrorPolicyChain`](super::ErrorPolicyChain).
///
/// Policies are immutable values; the chain supplies the attempt count.
pub struct ErrorPolicy<T: ?Sized> {
    action: PolicyAction<T>,
    filter: ErrorFilter,
    max_failed_attempts: Option<u32>,
    name: String,
}

impl<T: ?Sized> ErrorPolicy<T> {
    fn with_action(action: PolicyAction<T>, name: &str) -> Self {
        Self {
            action,
            filter: ErrorFilter::default(),
            max_failed_attempts: None,
            name: name.to_string(),
        }
    }

    /// Retry until `max_attempts` failed attempts have been reached
    pub fn retry(max_attempts: u32) -> Self {
        Self::with_action(PolicyAction::Retry, "retry").max_failed_attempts(max_attempts)
    }

    pub fn skip() -> Self {
        Self::with_action(PolicyAction::Skip, "skip")
    }

    pub fn custom<F>(action: F) -> Self
    where
        F: Fn(
                &T,
                &mut dyn FnMut(&T) -> Result<(), HandlerError>,
                &FailureContext<'_>,
            ) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        Self::with_action(PolicyAction::Custom(Arc::new(action)), "custom")
    }

    /// Name used in logs
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Only apply to errors of type `E`; may be called for several types
    pub fn apply_to<E: Error + 'static>(mut self) -> Self {
        self.filter.include.push(Arc::new(|e: &(dyn Error + 'static)| e.is::<E>()));
        self
    }

    /// Never apply to errors of type `E`
    pub fn exclude<E: Error + 'static>(mut self) -> Self {
        self.filter.exclude.push(Arc::new(|e: &(dyn Error + 'static)| e.is::<E>()));
        self
    }

    /// Only apply when `predicate` holds for the error
    pub fn apply_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.filter.conditions.push(Arc::new(predicate));
        self
    }

    /// Stop applying once more than `max` attempts have failed
    pub fn max_failed_attempts(mut self, max: u32) -> Self {
        self.max_failed_attempts = Some(max);
        self
    }

    /// Whether the policy applies to `error` at `attempt` (1-based)
    pub fn can_handle(&self, error: &(dyn Error + 'static), attempt: u32) -> bool {
        self.max_failed_attempts.map_or(true, |max| attempt <= max) && self.filter.matches(error)
    }

    pub fn kind(&self) -> PolicyKind {
        match self.action {
            PolicyAction::Retry => PolicyKind::Retry,
            PolicyAction::Skip => PolicyKind::Skip,
            PolicyAction::Custom(_) => PolicyKind::Custom,
        }
    }

    pub fn action(&self) -> &PolicyAction<T> {
        &self.action
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &ErrorFilter {
        &self.filter
    }
}

impl ErrorPolicy<[InboundMessage]> {
    /// Re-produce the failed messages through `producer` with their
    /// `x-failed-attempts` header set to the current attempt.
    ///
    /// Moving back to the source endpoint turns this into a delayed retry;
    /// moving elsewhere is a dead-letter queue.
    pub fn move_to(producer: Producer) -> Self {
        let destination = producer.endpoint().name().to_string();
        let name = format!("move to '{}'", destination);

        Self::custom(move |messages: &[InboundMessage], _handler, failure| {
            for inbound in messages {
                let mut headers = inbound.headers.clone();
                strip_chunk_headers(&mut headers);
                headers.remove(header_names::MESSAGE_TYPE);
                headers.remove(header_names::FAILED_ATTEMPTS);

                producer
                    .produce_failed(inbound.message.as_ref(), headers, failure.attempt)
                    .map_err(|e| Box::new(e) as HandlerError)?;
            }
            info!(
                "Moved {} messages to '{}' after {} failed attempts",
                messages.len(),
                destination,
                failure.attempt
            );
            Ok(())
        })
        .named(name)
    }
}

impl<T: ?Sized> Clone for ErrorPolicy<T> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            filter: self.filter.clone(),
            max_failed_attempts: self.max_failed_attempts,
            name: self.name.clone(),
        }
    }
}

impl<T: ?Sized> Debug for ErrorPolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorPolicy")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("filter", &self.filter)
            .field("max_failed_attempts", &self.max_failed_attempts)
            .finish()
    }
}
