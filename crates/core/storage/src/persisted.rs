use std::{future::Future, sync::Arc, time::Duration};

use futures::FutureExt;
use idmp_coalesced::{Cached, Coalescer, Error, Key, MaxAge, Options};
use idmp_result::Result;
use serde::{de::DeserializeOwned, Serialize};

use crate::StorageAdapter;

/// How long a persisted value stays in memory unless the memory cache is enabled
pub const MEMORY_WINDOW: Duration = Duration::from_millis(200);

/// Coalesced calls backed by a storage adapter.
///
/// On a miss in memory the stored payload is tried first and the factory
/// only runs if there is none. Fresh values are written back in the
/// background for the caller's max age.
pub struct Persisted<S> {
    coalescer: Coalescer,
    storage: Arc<S>,
    memory_cache: bool,
}

impl<S> Clone for Persisted<S> {
    fn clone(&self) -> Self {
        Self {
            coalescer: self.coalescer.clone(),
            storage: self.storage.clone(),
            memory_cache: self.memory_cache,
        }
    }
}

impl<S: StorageAdapter + 'static> Persisted<S> {
    /// Persist calls made through the process-wide coalescer
    pub fn new(storage: S) -> Self {
        Self {
            coalescer: Coalescer::global().clone(),
            storage: Arc::new(storage),
            memory_cache: false,
        }
    }

    /// Apply `memory_cache` from `Idmp.toml`
    pub async fn configured(storage: S) -> Self {
        let memory_cache = idmp_config::config().await.storage.memory_cache;
        Self::new(storage).memory_cache(memory_cache)
    }

    pub fn with_coalescer(mut self, coalescer: Coalescer) -> Self {
        self.coalescer = coalescer;
        self
    }

    /// Keep values in memory for the caller's max age instead of a short window
    pub fn memory_cache(mut self, enabled: bool) -> Self {
        self.memory_cache = enabled;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Key used in the coalescer, kept apart from calls made without storage
    fn namespace_key(&self, key: &Key) -> Key {
        Key::Str(format!(
            "idmp/{}/{}/{key}",
            crate::KEY_VERSION,
            self.storage.namespace()
        ))
    }

    /// Like [`Coalescer::call`], also going through storage.
    ///
    /// Storage failures never fail the call: unreadable payloads count as
    /// misses and failed writes are only logged.
    #[track_caller]
    pub fn call<T, E, F, Fut>(
        &self,
        key: impl Into<Key>,
        factory: F,
        mut options: Options<E>,
    ) -> impl Future<Output = std::result::Result<Cached<T>, Error<E>>> + Send + 'static
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        if key.is_falsy() {
            return self.coalescer.call(key, factory, options).boxed();
        }

        let storage = self.storage.clone();
        let storage_key = key.to_string();
        let max_age = options.max_age.clamp();
        let factory = Arc::new(factory);

        let persisted = move || {
            let storage = storage.clone();
            let storage_key = storage_key.clone();
            let factory = factory.clone();

            async move {
                if let Some(value) = restore::<T, S>(&*storage, &storage_key).await {
                    return Ok::<T, E>(value);
                }

                let value = factory().await?;

                match serde_json::to_string(&value) {
                    Ok(payload) => {
                        tokio::spawn(async move {
                            if let Err(err) = storage.set(&storage_key, payload, max_age).await {
                                error!("Failed to persist `{storage_key}`: {err}");
                            }
                        });
                    }
                    Err(err) => error!("Failed to serialise `{storage_key}`: {err}"),
                }

                Ok(value)
            }
        };

        if !self.memory_cache {
            options.max_age = match max_age {
                MaxAge::Finite(max_age) if max_age < MEMORY_WINDOW => MaxAge::Finite(max_age),
                _ => MaxAge::Finite(MEMORY_WINDOW),
            };
        }

        self.coalescer
            .call(self.namespace_key(&key), persisted, options)
            .boxed()
    }

    /// Evict `key` from memory and storage
    pub async fn flush(&self, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        if key.is_falsy() {
            return Ok(());
        }

        self.coalescer.flush(self.namespace_key(&key));
        self.storage.remove(&key.to_string()).await
    }

    /// Evict everything from memory and this adapter's namespace
    pub async fn flush_all(&self) -> Result<()> {
        self.coalescer.flush_all();
        self.storage.clear().await
    }
}

/// Stored value for `key`, if there is a readable one
async fn restore<T: DeserializeOwned, S: StorageAdapter>(storage: &S, key: &str) -> Option<T> {
    let payload = match storage.get(key).await {
        Ok(payload) => payload?,
        Err(err) => {
            warn!("Failed to read `{key}` from storage, treating it as a miss: {err}");
            return None;
        }
    };

    match serde_json::from_str(&payload) {
        Ok(value) => {
            debug!("Restored `{key}` from storage.");
            Some(value)
        }
        Err(err) => {
            warn!("Stored payload for `{key}` is unreadable, treating it as a miss: {err}");
            None
        }
    }
}
