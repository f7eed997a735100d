//! Error policies
//!
//! An [`ErrorPolicyChain`] decides, per failure and per attempt, whether a
//! failed handler is retried, its error skipped, or a custom action (such as
//! moving the messages to a dead-letter endpoint) applied. Errors no policy
//! accepts are returned as [`UnhandledError`].
//!
//! ```
//! use broker_integration::{ErrorPolicy, ErrorPolicyChain};
//!
//! let chain = ErrorPolicyChain::<str>::new([ErrorPolicy::retry(2), ErrorPolicy::skip()]);
//! let mut calls = 0;
//! let outcome = chain
//!     .try_handle("payload", 0, |_| {
//!         calls += 1;
//!         Err("still failing".into())
//!     })
//!     .unwrap();
//!
//! assert_eq!(calls, 3);
//! assert_eq!(outcome.policy(), Some(1));
//! ```

mod chain;
mod policy;

pub use chain::{ErrorPolicyChain, HandleOutcome, UnhandledError};
pub use policy::{
    CustomAction, ErrorFilter, ErrorPolicy, ErrorPredicate, FailureContext, PolicyAction,
    PolicyKind,
};
