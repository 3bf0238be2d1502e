mod fs;
#[cfg(feature = "redis")]
mod redis;
mod reference;

use std::path::PathBuf;

use async_trait::async_trait;
use idmp_coalesced::MaxAge;
use idmp_config::{config, StorageDriver};
#[cfg(not(feature = "redis"))]
use idmp_result::create_error;
use idmp_result::Result;

pub use self::fs::*;
#[cfg(feature = "redis")]
pub use self::redis::*;
pub use self::reference::*;

use crate::StorageAdapter;

/// Storage information to use to create an adapter
pub enum StorageInfo {
    /// Pick the adapter from `Idmp.toml`
    Auto,
    /// Keep payloads in memory
    Reference { namespace: String },
    /// Keep payloads on disk, an empty directory means the system's temporary directory
    Filesystem {
        directory: PathBuf,
        namespace: String,
    },
    /// Keep payloads in Redis
    Redis { namespace: String },
}

/// Storage adapter
#[derive(Clone)]
pub enum Storage {
    /// In-memory storage
    Reference(ReferenceStorage),
    /// Filesystem storage
    Filesystem(FilesystemStorage),
    /// Redis storage
    #[cfg(feature = "redis")]
    Redis(RedisStorage),
}

impl StorageInfo {
    /// Create a storage adapter from the given storage information
    pub async fn connect(self) -> Result<Storage> {
        let info = match self {
            StorageInfo::Auto => {
                let storage = config().await.storage;
                let namespace = storage.namespace;

                match storage.driver {
                    StorageDriver::Reference => StorageInfo::Reference { namespace },
                    StorageDriver::Filesystem => StorageInfo::Filesystem {
                        directory: storage.directory.into(),
                        namespace,
                    },
                    StorageDriver::Redis => StorageInfo::Redis { namespace },
                }
            }
            info => info,
        };

        match info {
            StorageInfo::Auto => unreachable!("resolved from configuration"),
            StorageInfo::Reference { namespace } => {
                Ok(Storage::Reference(ReferenceStorage::new(namespace)))
            }
            StorageInfo::Filesystem {
                directory,
                namespace,
            } => Ok(Storage::Filesystem(if directory.as_os_str().is_empty() {
                FilesystemStorage::temporary(namespace)
            } else {
                FilesystemStorage::new(directory, namespace)
            })),
            #[cfg(feature = "redis")]
            StorageInfo::Redis { namespace } => {
                let storage = RedisStorage::new(namespace);
                storage.ping().await?;
                Ok(Storage::Redis(storage))
            }
            #[cfg(not(feature = "redis"))]
            StorageInfo::Redis { .. } => {
                error!("Redis storage requested but the `redis` feature is not enabled.");
                Err(create_error!(StorageUnavailable {
                    driver: "redis".to_string()
                }))
            }
        }
    }
}

impl Storage {
    fn adapter(&self) -> &dyn StorageAdapter {
        match self {
            Storage::Reference(storage) => storage,
            Storage::Filesystem(storage) => storage,
            #[cfg(feature = "redis")]
            Storage::Redis(storage) => storage,
        }
    }
}

#[async_trait]
impl StorageAdapter for Storage {
    fn namespace(&self) -> &str {
        self.adapter().namespace()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.adapter().get(key).await
    }

    async fn set(&self, key: &str, payload: String, max_age: MaxAge) -> Result<()> {
        self.adapter().set(key, payload, max_age).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.adapter().remove(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.adapter().clear().await
    }
}

#[cfg(test)]
mod tests {
    use idmp_coalesced::MaxAge;

    use super::{Storage, StorageInfo};
    use crate::StorageAdapter;

    #[tokio::test]
    async fn connects_from_configuration() {
        let storage = StorageInfo::Auto.connect().await.unwrap();
        assert!(matches!(storage, Storage::Reference(_)));
        assert_eq!(storage.namespace(), "idmp");

        storage.set("k", "v".into(), MaxAge::Forever).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn connects_to_filesystem() {
        let directory = tempfile::tempdir().unwrap();
        let storage = StorageInfo::Filesystem {
            directory: directory.path().to_path_buf(),
            namespace: "fs".to_string(),
        }
        .connect()
        .await
        .unwrap();

        let Storage::Filesystem(fs) = &storage else {
            panic!("expected filesystem storage");
        };
        assert!(fs.root().starts_with(directory.path()));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn redis_requires_feature() {
        let result = StorageInfo::Redis {
            namespace: "idmp".to_string(),
        }
        .connect()
        .await;

        assert!(result.is_err());
    }
}
