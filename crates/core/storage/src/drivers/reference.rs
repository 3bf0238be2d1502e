use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::lock::Mutex;
use idmp_coalesced::MaxAge;
use idmp_result::Result;
use tokio::time::Instant;

use crate::StorageAdapter;

struct Entry {
    payload: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() >= expires_at)
            .unwrap_or_default()
    }
}

/// Reference implementation, keeps payloads in process memory
#[derive(Clone)]
pub struct ReferenceStorage {
    namespace: String,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl ReferenceStorage {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Default::default(),
        }
    }

    /// Storage under another namespace sharing the same entries
    pub fn sibling(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: self.entries.clone(),
        }
    }

    fn prefix(&self) -> String {
        format!("{}/{}/", crate::KEY_VERSION, self.namespace)
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix())
    }

    /// Number of live entries across every namespace
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| !entry.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ReferenceStorage {
    fn default() -> Self {
        Self::new("idmp")
    }
}

#[async_trait]
impl StorageAdapter for ReferenceStorage {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = self.entry_key(key);
        let mut entries = self.entries.lock().await;

        match entries.get(&key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(&key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.payload.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: String, max_age: MaxAge) -> Result<()> {
        let entry = Entry {
            payload,
            expires_at: max_age
                .clamp()
                .duration()
                .map(|max_age| Instant::now() + max_age),
        };

        let mut entries = self.entries.lock().await;
        entries.insert(self.entry_key(key), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(&self.entry_key(key));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let prefix = self.prefix();
        let mut entries = self.entries.lock().await;
        entries.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}
