use async_trait::async_trait;
use idmp_coalesced::MaxAge;
use idmp_result::{create_error, Result, ToIdmpError};
use redis_kiss::{get_connection, AsyncCommands, Conn};

use crate::StorageAdapter;

/// Stores payloads in Redis under `idmp/v1/<namespace>/`
#[derive(Clone, Debug)]
pub struct RedisStorage {
    namespace: String,
    prefix: String,
}

impl RedisStorage {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let prefix = format!("idmp/{}/{namespace}/", crate::KEY_VERSION);

        Self { namespace, prefix }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Make sure a connection can be established
    pub async fn ping(&self) -> Result<()> {
        connect().await.map(|_| ())
    }
}

async fn connect() -> Result<Conn> {
    get_connection().await.map_err(|_| {
        create_error!(StorageUnavailable {
            driver: "redis".to_string()
        })
    })
}

#[async_trait]
impl StorageAdapter for RedisStorage {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = connect().await?;
        conn.get(self.redis_key(key)).await.to_internal_error()
    }

    async fn set(&self, key: &str, payload: String, max_age: MaxAge) -> Result<()> {
        let mut conn = connect().await?;
        let key = self.redis_key(key);

        match max_age.clamp().duration() {
            None => conn.set::<_, _, ()>(key, payload).await.to_internal_error(),
            Some(max_age) if max_age.is_zero() => {
                conn.del::<_, ()>(key).await.to_internal_error()
            }
            Some(max_age) => conn
                .pset_ex::<_, _, ()>(key, payload, max_age.as_millis() as usize)
                .await
                .to_internal_error(),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = connect().await?;
        conn.del::<_, ()>(self.redis_key(key))
            .await
            .to_internal_error()
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = connect().await?;
        let keys: Vec<String> = conn
            .keys(format!("{}*", self.prefix))
            .await
            .to_internal_error()?;

        if keys.is_empty() {
            return Ok(());
        }

        info!("Clearing {} keys under `{}`.", keys.len(), self.prefix);
        conn.del::<_, ()>(keys).await.to_internal_error()
    }
}
