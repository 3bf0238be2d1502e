use std::{
    future::Future,
    panic::{self, AssertUnwindSafe, Location},
    sync::Arc,
    thread,
};

use futures::FutureExt;
use once_cell::sync::Lazy;
use tokio::{sync::oneshot, time::sleep};

use crate::{
    abort::AbortRegistration,
    integrity::check_call_site,
    registry::{Cell, Factory, Outcome, Registry, State, Status},
    AbortReason, AbortSignal, Cached, Error, Key, MaxAge, Options, RetryContext,
};

static GLOBAL: Lazy<Coalescer> = Lazy::new(Coalescer::new);

enum Admission<T, E> {
    Settled(Outcome<T, E>),
    Queued(oneshot::Receiver<Outcome<T, E>>),
}

/// Runs at most one factory per key at a time, shares its outcome with every
/// caller of that key and keeps successful values around for `max_age`.
///
/// Cloning is cheap and clones share the same registry. Must be used from
/// within a Tokio runtime.
#[derive(Clone, Default)]
pub struct Coalescer {
    registry: Arc<Registry>,
}

impl Coalescer {
    /// Create a coalescer with its own, empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide coalescer
    pub fn global() -> &'static Coalescer {
        &GLOBAL
    }

    /// Run `factory` under `key`, or join the run already in progress.
    ///
    /// Falsy keys skip deduplication, caching and retries entirely.
    #[track_caller]
    pub fn call<T, E, F, Fut>(
        &self,
        key: impl Into<Key>,
        factory: F,
        options: Options<E>,
    ) -> impl Future<Output = Result<Cached<T>, Error<E>>> + Send + 'static
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let call_site = Location::caller();
        let factory: Factory<T, E> = Arc::new(move || factory().boxed());
        let this = self.clone();

        async move { this.admit(key, factory, options, call_site).await }
    }

    /// Evict one key, does nothing if it isn't present
    pub fn flush(&self, key: impl Into<Key>) {
        let key = key.into();
        if key.is_falsy() {
            return;
        }

        if self.registry.delete(&key) {
            info!("Flushed cache for `{key}`.");
        }
    }

    /// Evict every key
    pub fn flush_all(&self) {
        self.registry.clear();
        info!("Flushed all cached keys.");
    }

    /// Whether `key` currently has shared state
    pub fn contains(&self, key: impl Into<Key>) -> bool {
        self.registry.contains(&key.into())
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn admit<T, E>(
        self,
        key: Key,
        factory: Factory<T, E>,
        mut options: Options<E>,
        call_site: &'static Location<'static>,
    ) -> Outcome<T, E>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let signal = options.signal.take();
        if let Some(reason) = signal.as_ref().and_then(AbortSignal::reason) {
            debug!("Call for `{key}` was aborted before it started: {reason}");
            return Err(Error::Aborted(reason));
        }

        if key.is_falsy() {
            return run_detached(factory, signal).await;
        }

        let Some(cell) = self.registry.get_or_create::<T, E>(&key) else {
            warn!("Key `{key}` is already in use with different types, possible key collision!");
            return Err(Error::TypeMismatch);
        };

        let options = Arc::new(Options {
            max_age: options.max_age.clamp(),
            ..options
        });

        let receiver = match self.enter(&key, &cell, factory, options, call_site) {
            Admission::Settled(outcome) => return outcome,
            Admission::Queued(receiver) => receiver,
        };

        let registration = signal.map(|signal| self.bind_abort(&key, &cell, &signal));

        drop(cell);
        let outcome = receiver.await.unwrap_or(Err(Error::RecvError));

        drop(registration);
        outcome
    }

    /// Branch on the key's status, queueing the caller if it has to wait
    fn enter<T, E>(
        &self,
        key: &Key,
        cell: &Arc<Cell<T, E>>,
        factory: Factory<T, E>,
        options: Arc<Options<E>>,
        call_site: &'static Location<'static>,
    ) -> Admission<T, E>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let mut state = cell.lock();

        if options.integrity {
            check_call_site(key, &mut state.call_sites, call_site);
        }

        let unsent = match &state.status {
            Status::Resolved(value) => return Admission::Settled(Ok(value.clone())),
            Status::Rejected(error) => return Admission::Settled(Err(error.clone())),
            Status::Aborted(reason) => {
                return Admission::Settled(Err(Error::Aborted(reason.clone())))
            }
            Status::Opening => false,
            Status::Unsent => true,
        };

        let (sender, receiver) = oneshot::channel();
        state.pending.push(sender);

        if unsent {
            if state.factory.is_none() {
                state.factory = Some(factory);
            }

            state.status = Status::Opening;
            self.launch(key.clone(), cell.clone(), &mut state, options);
        }

        Admission::Queued(receiver)
    }

    /// Spawn one attempt of the locked factory
    fn launch<T, E>(
        &self,
        key: Key,
        cell: Arc<Cell<T, E>>,
        state: &mut State<T, E>,
        options: Arc<Options<E>>,
    ) where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let Some(factory) = state.factory.clone() else {
            return;
        };

        debug!("Running attempt {} for `{key}`.", state.retry_count + 1);

        // A caller arriving during backoff starts the attempt early, the timer must not start another
        if let Some(timer) = state.task.take() {
            timer.abort();
        }

        let this = self.clone();
        let task = tokio::spawn(async move {
            let result = AssertUnwindSafe(factory()).catch_unwind().await;
            this.settle(key, cell, options, result);
        });

        state.task = Some(task.abort_handle());
    }

    fn settle<T, E>(
        &self,
        key: Key,
        cell: Arc<Cell<T, E>>,
        options: Arc<Options<E>>,
        result: thread::Result<Result<T, E>>,
    ) where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let mut state = cell.lock();

        // Aborted while the attempt was in flight
        if !matches!(state.status, Status::Opening) {
            return;
        }

        state.task = None;

        match result {
            Ok(Ok(value)) => {
                let value = Cached::shared(value, &key, options.integrity);
                debug!("Resolved `{key}` for {} callers.", state.pending.len());

                state.status = Status::Resolved(value.clone());
                state.drain(Ok(value));

                match options.max_age {
                    MaxAge::Forever => {}
                    MaxAge::Finite(max_age) if max_age.is_zero() => {
                        drop(state);
                        self.registry.delete_if_current(&key, &cell);
                    }
                    MaxAge::Finite(max_age) => {
                        let registry = self.registry.clone();
                        let expiring = cell.clone();
                        let expiry = tokio::spawn(async move {
                            sleep(max_age).await;
                            if registry.delete_if_current(&key, &expiring) {
                                info!("Cache for `{key}` expired.");
                            }
                        });

                        state.expiry = Some(expiry.abort_handle());
                    }
                }
            }
            Ok(Err(err)) => {
                // Stays `Opening` until the retry hook has run, new callers keep queueing
                state.retry_count += 1;
                let retry_count = state.retry_count;

                if retry_count > options.max_retry {
                    debug!(
                        "Giving up on `{key}` after {retry_count} attempts, rejecting {} callers.",
                        state.pending.len()
                    );

                    let error = Error::Failed(Arc::new(err));
                    state.status = Status::Rejected(error.clone());
                    state.drain(Err(error));

                    drop(state);
                    self.registry.delete_if_current(&key, &cell);
                    return;
                }

                drop(state);

                if self.before_retry(&key, &cell, &options, &err, retry_count) {
                    self.schedule_retry(key, cell, options, retry_count);
                }
            }
            Err(_) => {
                error!("Factory for `{key}` panicked, rejecting {} callers.", state.pending.len());

                state.status = Status::Rejected(Error::Panicked);
                state.drain(Err(Error::Panicked));

                drop(state);
                self.registry.delete_if_current(&key, &cell);
            }
        }
    }

    /// Run the retry hook, rejecting every caller if it panics.
    ///
    /// Returns whether the retry should go ahead.
    fn before_retry<T, E>(
        &self,
        key: &Key,
        cell: &Arc<Cell<T, E>>,
        options: &Options<E>,
        err: &E,
        retry_count: u32,
    ) -> bool
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let Some(hook) = &options.on_before_retry else {
            return true;
        };

        let context = RetryContext { key, retry_count };
        if panic::catch_unwind(AssertUnwindSafe(|| hook(err, context))).is_ok() {
            return true;
        }

        let mut state = cell.lock();
        if !matches!(state.status, Status::Opening) {
            return false;
        }

        error!("Retry hook for `{key}` panicked, rejecting {} callers.", state.pending.len());

        state.status = Status::Rejected(Error::Panicked);
        state.drain(Err(Error::Panicked));

        drop(state);
        self.registry.delete_if_current(key, cell);
        false
    }

    fn schedule_retry<T, E>(
        &self,
        key: Key,
        cell: Arc<Cell<T, E>>,
        options: Arc<Options<E>>,
        retry_count: u32,
    ) where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let delay = options.backoff.delay(retry_count);
        let timer_cell = cell.clone();
        let mut state = cell.lock();

        // Aborted while the hook ran
        if !matches!(state.status, Status::Opening) {
            return;
        }

        state.status = Status::Unsent;
        debug!("Retrying `{key}` in {delay:?} (retry {retry_count}).");

        let this = self.clone();
        let timer = tokio::spawn(async move {
            sleep(delay).await;
            this.resume(key, timer_cell, options);
        });

        state.task = Some(timer.abort_handle());
    }

    /// Backoff elapsed, start the next attempt unless somebody beat us to it
    fn resume<T, E>(&self, key: Key, cell: Arc<Cell<T, E>>, options: Arc<Options<E>>)
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let mut state = cell.lock();
        if !matches!(state.status, Status::Unsent) {
            return;
        }

        // The handle is this timer's own
        state.task = None;
        state.status = Status::Opening;
        self.launch(key, cell.clone(), &mut state, options);
    }

    /// Abort every caller of `key` once `signal` fires, for as long as the registration lives
    fn bind_abort<T, E>(
        &self,
        key: &Key,
        cell: &Arc<Cell<T, E>>,
        signal: &AbortSignal,
    ) -> AbortRegistration
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let registry = self.registry.clone();
        let key = key.clone();
        let cell = Arc::downgrade(cell);

        signal.on_abort(move |reason| {
            if let Some(cell) = cell.upgrade() {
                abort_state(&registry, &key, &cell, reason);
            }
        })
    }

    /// Call sites recorded for `key`
    #[cfg(test)]
    pub(crate) fn call_sites<T, E>(&self, key: impl Into<Key>) -> Vec<&'static Location<'static>>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        self.registry
            .get_or_create::<T, E>(&key.into())
            .map(|cell| cell.lock().call_sites.clone())
            .unwrap_or_default()
    }
}

fn abort_state<T, E>(registry: &Registry, key: &Key, cell: &Arc<Cell<T, E>>, reason: &AbortReason) {
    let mut state = cell.lock();
    if !matches!(state.status, Status::Unsent | Status::Opening) {
        return;
    }

    if let Some(task) = state.task.take() {
        task.abort();
    }

    info!("Aborting `{key}` for {} callers: {reason}", state.pending.len());

    state.status = Status::Aborted(reason.clone());
    state.drain(Err(Error::Aborted(reason.clone())));

    drop(state);
    registry.delete_if_current(key, cell);
}

/// Falsy keys: a plain call of the factory, racing the signal if there is one
async fn run_detached<T, E>(factory: Factory<T, E>, signal: Option<AbortSignal>) -> Outcome<T, E> {
    let attempt = async move {
        factory()
            .await
            .map(Cached::detached)
            .map_err(|err| Error::Failed(Arc::new(err)))
    };

    match signal {
        Some(signal) => tokio::select! {
            outcome = attempt => outcome,
            reason = signal.aborted() => Err(Error::Aborted(reason)),
        },
        None => attempt.await,
    }
}

/// [`Coalescer::call`] on the process-wide coalescer
#[track_caller]
pub fn call<T, E, F, Fut>(
    key: impl Into<Key>,
    factory: F,
    options: Options<E>,
) -> impl Future<Output = Result<Cached<T>, Error<E>>> + Send + 'static
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Coalescer::global().call(key, factory, options)
}

/// [`Coalescer::flush`] on the process-wide coalescer
pub fn flush(key: impl Into<Key>) {
    Coalescer::global().flush(key)
}

/// [`Coalescer::flush_all`] on the process-wide coalescer
pub fn flush_all() {
    Coalescer::global().flush_all()
}
