use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use idmp_coalesced::MaxAge;
use idmp_result::{create_error, create_io_error, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::StorageAdapter;

/// What is written to disk for every key
#[derive(Serialize, Deserialize, Debug)]
struct Envelope {
    /// Written at, milliseconds since the epoch
    #[serde(rename = "t")]
    written_at: u64,
    /// Max age in milliseconds, `None` never expires
    #[serde(rename = "a")]
    max_age: Option<u64>,
    #[serde(rename = "d")]
    payload: String,
}

impl Envelope {
    fn is_expired(&self, now: u64) -> bool {
        match self.max_age {
            Some(max_age) => now.saturating_sub(self.written_at) >= max_age,
            None => false,
        }
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Stores one JSON file per key under `<directory>/v1/<namespace>/`
#[derive(Clone, Debug)]
pub struct FilesystemStorage {
    namespace: String,
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(directory: impl AsRef<Path>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let root = directory
            .as_ref()
            .join(crate::KEY_VERSION)
            .join(URL_SAFE_NO_PAD.encode(&namespace));

        Self { namespace, root }
    }

    /// Storage under the system's temporary directory
    pub fn temporary(namespace: impl Into<String>) -> Self {
        Self::new(std::env::temp_dir().join("idmp"), namespace)
    }

    /// Directory holding this namespace's files
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(create_error!(InvalidKey));
        }

        Ok(self.root.join(URL_SAFE_NO_PAD.encode(key)))
    }
}

#[async_trait]
impl StorageAdapter for FilesystemStorage {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key)?;
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(_) => return Err(create_io_error!("read", path.display())),
        };

        let envelope: Envelope = serde_json::from_str(&contents).map_err(|err| {
            create_error!(SerializationFailed {
                error: err.to_string()
            })
        })?;

        if envelope.is_expired(now()) {
            debug!("Removing expired `{}`.", path.display());
            self.remove(key).await?;
            return Ok(None);
        }

        Ok(Some(envelope.payload))
    }

    async fn set(&self, key: &str, payload: String, max_age: MaxAge) -> Result<()> {
        let path = self.path(key)?;
        let envelope = Envelope {
            written_at: now(),
            max_age: max_age
                .clamp()
                .duration()
                .map(|max_age| max_age.as_millis() as u64),
            payload,
        };

        let contents = serde_json::to_string(&envelope).map_err(|err| {
            create_error!(SerializationFailed {
                error: err.to_string()
            })
        })?;

        fs::create_dir_all(&self.root)
            .await
            .map_err(|_| create_io_error!("create", self.root.display()))?;

        fs::write(&path, contents)
            .await
            .map_err(|_| create_io_error!("write", path.display()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match fs::remove_file(&path).await {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                Err(create_io_error!("remove", path.display()))
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                Err(create_io_error!("remove", self.root.display()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use idmp_coalesced::MaxAge;
    use idmp_result::ErrorType;

    use super::{Envelope, FilesystemStorage};
    use crate::StorageAdapter;

    #[tokio::test]
    async fn stores_envelopes() {
        let directory = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(directory.path(), "test");

        assert_eq!(storage.get("user/1?x=y").await.unwrap(), None);

        storage
            .set("user/1?x=y", "{\"a\":1}".into(), MaxAge::Forever)
            .await
            .unwrap();
        assert_eq!(
            storage.get("user/1?x=y").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        let mut files = std::fs::read_dir(storage.root()).unwrap();
        let file = files.next().unwrap().unwrap();
        assert!(files.next().is_none());

        let envelope: Envelope =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(envelope.max_age, None);
        assert_eq!(envelope.payload, "{\"a\":1}");

        storage.remove("user/1?x=y").await.unwrap();
        storage.remove("user/1?x=y").await.unwrap();
        assert_eq!(storage.get("user/1?x=y").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_files_are_removed() {
        let directory = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(directory.path(), "test");

        storage
            .set("k", "1".into(), MaxAge::Finite(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(std::fs::read_dir(storage.root()).unwrap().count(), 1);

        assert_eq!(storage.get("k").await.unwrap(), None);
        assert_eq!(std::fs::read_dir(storage.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn clear_only_removes_own_namespace() {
        let directory = tempfile::tempdir().unwrap();
        let first = FilesystemStorage::new(directory.path(), "first");
        let second = FilesystemStorage::new(directory.path(), "second");

        first.clear().await.unwrap();

        first.set("k", "1".into(), MaxAge::Forever).await.unwrap();
        second.set("k", "2".into(), MaxAge::Forever).await.unwrap();

        first.clear().await.unwrap();
        assert!(!first.root().exists());
        assert_eq!(first.get("k").await.unwrap(), None);
        assert_eq!(second.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn corrupt_files_and_empty_keys_are_errors() {
        let directory = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(directory.path(), "test");

        storage.set("k", "1".into(), MaxAge::Forever).await.unwrap();
        let file = std::fs::read_dir(storage.root()).unwrap().next().unwrap().unwrap();
        std::fs::write(file.path(), "not json").unwrap();

        assert!(matches!(
            storage.get("k").await.unwrap_err().error_type,
            ErrorType::SerializationFailed { .. }
        ));
        assert_eq!(
            storage.get("").await.unwrap_err().error_type,
            ErrorType::InvalidKey
        );
    }
}
