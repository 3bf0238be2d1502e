use std::{any::Any, panic::Location, sync::Arc};

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::{sync::oneshot, task::AbortHandle};

use crate::{AbortReason, Cached, Error, Key};

pub(crate) type Outcome<T, E> = Result<Cached<T>, Error<E>>;
pub(crate) type Factory<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
pub(crate) type Cell<T, E> = Mutex<State<T, E>>;

pub(crate) enum Status<T, E> {
    Unsent,
    Opening,
    Resolved(Cached<T>),
    Rejected(Error<E>),
    Aborted(AbortReason),
}

/// Shared state of one key
pub(crate) struct State<T, E> {
    pub retry_count: u32,
    pub status: Status<T, E>,
    pub pending: Vec<oneshot::Sender<Outcome<T, E>>>,
    /// Factory of the caller that opened this state, used for every retry
    pub factory: Option<Factory<T, E>>,
    /// In-flight attempt or backoff timer
    pub task: Option<AbortHandle>,
    pub expiry: Option<AbortHandle>,
    /// Call sites seen for this key, first one first
    pub call_sites: Vec<&'static Location<'static>>,
}

impl<T, E> State<T, E> {
    fn new() -> Self {
        Self {
            retry_count: 0,
            status: Status::Unsent,
            pending: Vec::new(),
            factory: None,
            task: None,
            expiry: None,
            call_sites: Vec::new(),
        }
    }

    /// Deliver an outcome to every queued caller, in arrival order
    pub fn drain(&mut self, outcome: Outcome<T, E>) {
        for sender in std::mem::take(&mut self.pending) {
            // Callers may have stopped waiting
            sender.send(outcome.clone()).ok();
        }
    }
}

/// Type-erased registry entry
pub(crate) trait Slot: Send + Sync {
    /// Called once the state has been removed from the registry
    fn detach(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static, E: Send + Sync + 'static> Slot for Cell<T, E> {
    fn detach(&self) {
        if let Some(expiry) = self.lock().expiry.take() {
            expiry.abort();
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn same_slot<T, E>(slot: &Arc<dyn Slot>, cell: &Arc<Cell<T, E>>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(slot) as *const (),
        Arc::as_ptr(cell) as *const (),
    )
}

/// Map from key to its shared state
#[derive(Default)]
pub(crate) struct Registry {
    states: DashMap<Key, Arc<dyn Slot>>,
}

impl Registry {
    /// Fetch the state for `key`, creating it if absent.
    ///
    /// Fails if the key is held by a state of different types.
    pub fn get_or_create<T, E>(&self, key: &Key) -> Option<Arc<Cell<T, E>>>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let slot = self
            .states
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(State::<T, E>::new())) as Arc<dyn Slot>)
            .value()
            .clone();

        slot.into_any().downcast::<Cell<T, E>>().ok()
    }

    /// Remove `key` if it still maps to `cell`
    pub fn delete_if_current<T, E>(&self, key: &Key, cell: &Arc<Cell<T, E>>) -> bool {
        self.states
            .remove_if(key, |_, slot| same_slot(slot, cell))
            .is_some()
    }

    pub fn delete(&self, key: &Key) -> bool {
        match self.states.remove(key) {
            Some((_, slot)) => {
                slot.detach();
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let keys: Vec<Key> = self.states.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.delete(&key);
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.states.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }
}
