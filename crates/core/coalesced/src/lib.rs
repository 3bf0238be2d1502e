//! Single-flight execution of async work: concurrent calls sharing a key run
//! the factory once, share its outcome, cache successful values for a while
//! and retry failures with exponential backoff.

#[macro_use]
extern crate log;

mod abort;
mod backoff;
mod error;
mod integrity;
mod key;
mod options;
mod registry;
mod service;


pub use abort::{AbortController, AbortReason, AbortSignal};
pub use backoff::Backoff;
pub use error::Error;
pub use integrity::{Cached, ReadOnlyViolation};
pub use key::{Key, Token};
pub use options::{
    MaxAge, Options, RetryContext, RetryHook, DEFAULT_MAX_AGE, DEFAULT_MAX_RETRY,
    DEFAULT_MAX_RETRY_DELAY, DEFAULT_MIN_RETRY_DELAY, MAX_AGE_LIMIT,
};
pub use service::{call, flush, flush_all, Coalescer};
