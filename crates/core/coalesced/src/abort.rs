use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::watch::{channel as watch_channel, Sender};

type Listener = Box<dyn FnOnce(&AbortReason) + Send>;

/// Why an operation was aborted
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct AbortReason(Arc<str>);

impl AbortReason {
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl Default for AbortReason {
    fn default() -> Self {
        Self::new("This operation was aborted")
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AbortReason {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AbortReason {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

struct Inner {
    reason: Sender<Option<AbortReason>>,
    listeners: Mutex<Listeners>,
}

impl Inner {
    fn reason(&self) -> Option<AbortReason> {
        self.reason.borrow().clone()
    }
}

/// Owner side of an abort signal
#[derive(Clone)]
pub struct AbortController {
    inner: Arc<Inner>,
}

/// Observer side of an abort signal, cheap to clone and share between calls
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl AbortController {
    pub fn new() -> Self {
        let (reason, _) = watch_channel(None);

        Self {
            inner: Arc::new(Inner {
                reason,
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            inner: self.inner.clone(),
        }
    }

    /// Abort with the given reason.
    ///
    /// Listeners run synchronously before this returns. Only the first call
    /// has any effect.
    pub fn abort(&self, reason: impl Into<AbortReason>) {
        let reason = reason.into();
        let fired = self.inner.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }

            *current = Some(reason.clone());
            true
        });

        if !fired {
            return;
        }

        let listeners = std::mem::take(&mut self.inner.listeners.lock().entries);
        for listener in listeners.into_values() {
            listener(&reason);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.reason.borrow().is_some()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// Reason this signal was aborted with, if it has been
    pub fn reason(&self) -> Option<AbortReason> {
        self.inner.reason()
    }

    pub fn is_aborted(&self) -> bool {
        self.reason().is_some()
    }

    /// Wait until the signal is aborted
    pub async fn aborted(&self) -> AbortReason {
        let mut receiver = self.inner.reason.subscribe();

        let reason = receiver
            .wait_for(|reason| reason.is_some())
            .await
            .map(|reason| reason.clone().unwrap_or_default());

        match reason {
            Ok(reason) => reason,
            // The sender lives as long as this signal does
            Err(_) => std::future::pending().await,
        }
    }

    /// Run `listener` once when the signal aborts, or right away if it already has.
    ///
    /// The listener is unregistered when the returned registration is dropped.
    pub(crate) fn on_abort(
        &self,
        listener: impl FnOnce(&AbortReason) + Send + 'static,
    ) -> AbortRegistration {
        let mut listeners = self.inner.listeners.lock();

        if let Some(reason) = self.inner.reason() {
            drop(listeners);
            listener(&reason);

            return AbortRegistration {
                inner: self.inner.clone(),
                id: None,
            };
        }

        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Box::new(listener));

        AbortRegistration {
            inner: self.inner.clone(),
            id: Some(id),
        }
    }

    /// Number of listeners still waiting for this signal
    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.listeners.lock().entries.len()
    }
}

/// Listener registered on an [`AbortSignal`], removed on drop
#[must_use]
pub(crate) struct AbortRegistration {
    inner: Arc<Inner>,
    id: Option<u64>,
}

impl Drop for AbortRegistration {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.inner.listeners.lock().entries.remove(&id);
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("reason", &self.reason())
            .finish()
    }
}

impl fmt::Debug for AbortController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortController")
            .field("reason", &self.inner.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::{AbortController, AbortReason};

    #[test]
    fn listeners_fire_once_in_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let fired = Arc::new(AtomicUsize::new(0));

        let mut registrations = Vec::new();
        for _ in 0..3 {
            let fired = fired.clone();
            registrations.push(signal.on_abort(move |reason| {
                assert_eq!(reason.message(), "stop");
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(!signal.is_aborted());
        controller.abort("stop");
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        controller.abort("again");
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(signal.reason(), Some(AbortReason::from("stop")));
    }

    #[test]
    fn late_listener_fires_immediately() {
        let controller = AbortController::new();
        controller.abort(AbortReason::default());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _registration = controller.signal().on_abort(move |reason| {
            assert_eq!(reason.to_string(), "This operation was aborted");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_registration_is_forgotten() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let fired = fired.clone();
            drop(signal.on_abort(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(signal.listener_count(), 0);

        let counter = fired.clone();
        let kept = signal.on_abort(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(signal.listener_count(), 1);

        controller.abort("stop");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(signal.listener_count(), 0);
        drop(kept);
    }

    #[tokio::test]
    async fn aborted_future_resolves() {
        let controller = AbortController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move { signal.aborted().await });
        tokio::task::yield_now().await;
        controller.abort("done");

        assert_eq!(waiter.await.unwrap().message(), "done");
    }
}
