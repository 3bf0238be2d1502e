//! Persistent storage for coalesced calls.
//!
//! Adapters implement [`StorageAdapter`]; [`Persisted`] puts one in front of
//! a [`Coalescer`](idmp_coalesced::Coalescer) so that values survive the
//! in-memory cache window and process restarts.

#[macro_use]
extern crate log;

mod adapter;
mod drivers;
mod persisted;

pub use adapter::*;
pub use drivers::*;
pub use persisted::*;
