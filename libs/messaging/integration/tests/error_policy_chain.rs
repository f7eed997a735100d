//! Error policy chain behaviour against permanently and selectively failing
//! handlers.

use broker_integration::{
    ErrorPolicy, ErrorPolicyChain, HandleOutcome, HandlerError, PolicyKind,
};
use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("transient failure")]
struct Transient;

#[derive(Debug, thiserror::Error)]
#[error("corrupt payload")]
struct Corrupt;

/// Handler that always fails with `Transient`, counting its calls
fn always_failing(calls: &Cell<u32>) -> impl FnMut(&str) -> Result<(), HandlerError> + '_ {
    move |_| {
        calls.set(calls.get() + 1);
        Err(Box::new(Transient) as HandlerError)
    }
}

#[test]
fn identical_unlimited_policies_apply_only_the_first() {
    let calls = Cell::new(0);
    let chain = ErrorPolicyChain::<str>::new([
        ErrorPolicy::skip(),
        ErrorPolicy::skip(),
        ErrorPolicy::skip(),
        ErrorPolicy::skip(),
        ErrorPolicy::skip(),
    ]);

    let outcome = chain.try_handle("message", 0, always_failing(&calls)).unwrap();

    assert_eq!(outcome, HandleOutcome::Skipped { policy: 0, attempt: 1 });
    assert_eq!(calls.get(), 1);
}

#[test]
fn retry_then_terminal_policy() {
    for k in 1..=4u32 {
        let calls = Cell::new(0);
        let applied = Arc::new(AtomicU32::new(0));
        let counter = applied.clone();
        let chain = ErrorPolicyChain::<str>::new([
            ErrorPolicy::retry(k),
            ErrorPolicy::custom(move |_: &str, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ]);

        let outcome = chain.try_handle("message", 0, always_failing(&calls)).unwrap();

        assert_eq!(calls.get(), k + 1, "handler calls for retry({})", k);
        assert_eq!(applied.load(Ordering::SeqCst), 1);
        assert_eq!(outcome, HandleOutcome::Handled { policy: 1, attempt: k + 1 });
    }
}

#[test]
fn retry_then_skip_swallows_the_error() {
    for k in 0..=5u32 {
        let calls = Cell::new(0);
        let chain = ErrorPolicyChain::<str>::new([ErrorPolicy::retry(k), ErrorPolicy::skip()]);

        let outcome = chain.try_handle("message", 0, always_failing(&calls));

        assert!(outcome.is_ok(), "retry({}) + skip leaked an error", k);
        assert_eq!(calls.get(), k + 1);
    }
}

#[test]
fn filtered_retry_stops_on_other_errors() {
    let calls = Cell::new(0);
    let chain = ErrorPolicyChain::<str>::new([
        ErrorPolicy::retry(5).apply_to::<Transient>(),
        ErrorPolicy::skip(),
    ]);

    let outcome = chain
        .try_handle("message", 0, |_| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Err(Box::new(Transient) as HandlerError)
            } else {
                Err(Box::new(Corrupt) as HandlerError)
            }
        })
        .unwrap();

    assert_eq!(calls.get(), 2);
    assert_eq!(outcome, HandleOutcome::Skipped { policy: 1, attempt: 2 });
}

#[test]
fn run_of_single_retries_ends_with_terminal_policy() {
    let calls = Cell::new(0);
    let chain = ErrorPolicyChain::<str>::new([
        ErrorPolicy::retry(1),
        ErrorPolicy::retry(1),
        ErrorPolicy::retry(1),
        ErrorPolicy::skip(),
    ]);

    let outcome = chain.try_handle("message", 0, always_failing(&calls)).unwrap();

    // The attempt counter is shared by the whole chain, so every retry(1)
    // is exhausted after the first failure.
    assert_eq!(outcome.policy(), Some(3));
    assert_eq!(chain.policies()[3].kind(), PolicyKind::Skip);
    assert_eq!(calls.get(), 2);
}

#[test]
fn unmatched_errors_propagate() {
    let calls = Cell::new(0);
    let chain = ErrorPolicyChain::<str>::new([
        ErrorPolicy::retry(2).apply_to::<Corrupt>(),
        ErrorPolicy::skip().exclude::<Transient>(),
    ]);

    let err = chain
        .try_handle("message", 0, always_failing(&calls))
        .unwrap_err();

    assert!(err.error.is::<Transient>());
    assert_eq!(err.attempts, 1);
    assert_eq!(calls.get(), 1);
}

#[test]
fn skip_limited_to_first_failures() {
    let chain = ErrorPolicyChain::<str>::new([ErrorPolicy::skip().max_failed_attempts(2)]);

    let calls = Cell::new(0);
    assert!(chain.try_handle("message", 1, always_failing(&calls)).is_ok());

    let calls = Cell::new(0);
    let err = chain
        .try_handle("message", 2, always_failing(&calls))
        .unwrap_err();
    assert_eq!(err.attempts, 3);
}

#[test]
fn predicates_narrow_a_policy() {
    let chain = ErrorPolicyChain::<str>::new([
        ErrorPolicy::skip().apply_when(|e| e.to_string().starts_with("corrupt"))
    ]);

    assert!(chain
        .try_handle("message", 0, |_| Err(Box::new(Corrupt) as HandlerError))
        .is_ok());
    assert!(chain
        .try_handle("message", 0, |_| Err(Box::new(Transient) as HandlerError))
        .is_err());
}
