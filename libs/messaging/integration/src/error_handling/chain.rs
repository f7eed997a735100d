use super::policy::{ErrorPolicy, FailureContext, PolicyAction};
use crate::HandlerError;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a handler invocation guarded by the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The handler eventually succeeded
    Succeeded { attempt: u32 },
    /// A skip policy swallowed the error
    Skipped { policy: usize, attempt: u32 },
    /// A custom policy handled the error
    Handled { policy: usize, attempt: u32 },
}

impl HandleOutcome {
    /// Failed attempts counted when the outcome was decided
    pub fn attempt(&self) -> u32 {
        match *self {
            HandleOutcome::Succeeded { attempt }
            | HandleOutcome::Skipped { attempt, .. }
            | HandleOutcome::Handled { attempt, .. } => attempt,
        }
    }

    /// Index of the terminal policy that was applied, if any
    pub fn policy(&self) -> Option<usize> {
        match *self {
            HandleOutcome::Succeeded { .. } => None,
            HandleOutcome::Skipped { policy, .. } | HandleOutcome::Handled { policy, .. } => {
                Some(policy)
            }
        }
    }
}

/// An error no policy accepted
#[derive(Debug, thiserror::Error)]
#[error("Unhandled error after {attempts} failed attempts: {error}")]
pub struct UnhandledError {
    #[source]
    pub error: HandlerError,
    pub attempts: u32,
}

/// Ordered, immutable sequence of error policies
pub struct ErrorPolicyChain<T: ?Sized> {
    policies: Arc<[ErrorPolicy<T>]>,
}

impl<T: ?Sized> ErrorPolicyChain<T> {
    pub fn new(policies: impl IntoIterator<Item = ErrorPolicy<T>>) -> Self {
        Self {
            policies: policies.into_iter().collect(),
        }
    }

    /// A chain that handles nothing; every error propagates
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    pub fn policies(&self) -> &[ErrorPolicy<T>] {
        &self.policies
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// First policy accepting `error` at `attempt`, with its index
    pub fn select(
        &self,
        attempt: u32,
        error: &(dyn Error + 'static),
    ) -> Option<(usize, &ErrorPolicy<T>)> {
        self.policies
            .iter()
            .enumerate()
            .find(|(_, policy)| policy.can_handle(error, attempt))
    }

    /// Invoke `handler` on `subject`, applying the chain to every failure.
    ///
    /// `failed_attempts` seeds the attempt counter for messages that already
    /// failed elsewhere. Retries call the handler again in place; the chain
    /// is matched from its head on every new failure.
    pub fn try_handle<F>(
        &self,
        subject: &T,
        failed_attempts: u32,
        mut handler: F,
    ) -> Result<HandleOutcome, UnhandledError>
    where
        F: FnMut(&T) -> Result<(), HandlerError>,
    {
        let mut attempt = failed_attempts;

        loop {
            let error = match handler(subject) {
                Ok(()) => return Ok(HandleOutcome::Succeeded { attempt }),
                Err(error) => error,
            };
            attempt = attempt.saturating_add(1);

            let Some((index, policy)) = self.select(attempt, &*error) else {
                debug!("No error policy applies at attempt {}: {}", attempt, error);
                return Err(UnhandledError {
                    error,
                    attempts: attempt,
                });
            };

            match policy.action() {
                PolicyAction::Retry => {
                    warn!(
                        "Attempt {} failed, retrying ({}): {}",
                        attempt,
                        policy.name(),
                        error
                    );
                }
                PolicyAction::Skip => {
                    warn!(
                        "Attempt {} failed, skipping ({}): {}",
                        attempt,
                        policy.name(),
                        error
                    );
                    return Ok(HandleOutcome::Skipped {
                        policy: index,
                        attempt,
                    });
                }
                PolicyAction::Custom(action) => {
                    warn!(
                        "Attempt {} failed, applying {}: {}",
                        attempt,
                        policy.name(),
                        error
                    );
                    let failure = FailureContext {
                        error: &*error,
                        attempt,
                    };
                    return match action(subject, &mut handler, &failure) {
                        Ok(()) => Ok(HandleOutcome::Handled {
                            policy: index,
                            attempt,
                        }),
                        Err(error) => Err(UnhandledError {
                            error,
                            attempts: attempt,
                        }),
                    };
                }
            }
        }
    }
}

impl<T: ?Sized> Clone for ErrorPolicyChain<T> {
    fn clone(&self) -> Self {
        Self {
            policies: self.policies.clone(),
        }
    }
}

impl<T: ?Sized> Default for ErrorPolicyChain<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> fmt::Debug for ErrorPolicyChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.policies.iter()).finish()
    }
}

impl<T: ?Sized> FromIterator<ErrorPolicy<T>> for ErrorPolicyChain<T> {
    fn from_iter<I: IntoIterator<Item = ErrorPolicy<T>>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn failing(calls: &mut u32) -> impl FnMut(&str) -> Result<(), HandlerError> + '_ {
        move |_: &str| {
            *calls += 1;
            Err(Box::new(Boom) as HandlerError)
        }
    }

    #[test]
    fn test_success_reports_seeded_attempt() {
        let chain = ErrorPolicyChain::<str>::new([ErrorPolicy::skip()]);

        let outcome = chain.try_handle("msg", 4, |_| Ok(())).unwrap();
        assert_eq!(outcome, HandleOutcome::Succeeded { attempt: 4 });
        assert_eq!(outcome.policy(), None);
    }

    #[test]
    fn test_empty_chain_propagates() {
        let mut calls = 0;
        let err = ErrorPolicyChain::<str>::empty()
            .try_handle("msg", 0, failing(&mut calls))
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert!(err.error.is::<Boom>());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_select_is_pure() {
        let chain = ErrorPolicyChain::<str>::new([ErrorPolicy::retry(1), ErrorPolicy::skip()]);

        assert_eq!(chain.select(1, &Boom).map(|(i, _)| i), Some(0));
        assert_eq!(chain.select(2, &Boom).map(|(i, _)| i), Some(1));
        assert_eq!(chain.select(1, &Boom).map(|(i, _)| i), Some(0));
    }

    #[test]
    fn test_seeded_attempts_exhaust_retry() {
        let mut calls = 0;
        let chain = ErrorPolicyChain::<str>::new([ErrorPolicy::retry(3), ErrorPolicy::skip()]);

        let outcome = chain.try_handle("msg", 3, failing(&mut calls)).unwrap();

        assert_eq!(outcome, HandleOutcome::Skipped { policy: 1, attempt: 4 });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_attempt_counter_saturates() {
        let mut calls = 0;
        let chain = ErrorPolicyChain::<str>::new([ErrorPolicy::retry(3), ErrorPolicy::skip()]);

        let outcome = chain
            .try_handle("msg", u32::MAX, failing(&mut calls))
            .unwrap();

        assert_eq!(
            outcome,
            HandleOutcome::Skipped {
                policy: 1,
                attempt: u32::MAX
            }
        );
        assert_eq!(calls, 1);

        let mut calls = 0;
        let err = ErrorPolicyChain::<str>::empty()
            .try_handle("msg", u32::MAX, failing(&mut calls))
            .unwrap_err();
        assert_eq!(err.attempts, u32::MAX);
    }

    #[test]
    fn test_custom_action_may_reinvoke_handler() {
        let chain = ErrorPolicyChain::<str>::new([ErrorPolicy::custom(
            |subject: &str, handler, _failure| {
                assert_eq!(subject, "msg");
                handler(subject)
            },
        )]);
        let mut calls = 0;

        let outcome = chain.try_handle("msg", 0, |_| {
            calls += 1;
            if calls == 1 {
                Err(Box::new(Boom) as HandlerError)
            } else {
                Ok(())
            }
        });

        assert_eq!(
            outcome.unwrap(),
            HandleOutcome::Handled {
                policy: 0,
                attempt: 1
            }
        );
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_failing_custom_action_propagates() {
        let chain = ErrorPolicyChain::<str>::new([ErrorPolicy::custom(|_: &str, _, _| {
            Err("dead letter queue unavailable".into())
        })]);
        let mut calls = 0;

        let err = chain.try_handle("msg", 0, failing(&mut calls)).unwrap_err();
        assert_eq!(err.error.to_string(), "dead letter queue unavailable");
        assert_eq!(err.attempts, 1);
    }
}
