use async_trait::async_trait;
use idmp_coalesced::MaxAge;
use idmp_result::Result;

/// Versioned prefix of every persisted key
pub static KEY_VERSION: &str = "v1";

/// Key/value store backing persisted calls.
///
/// Payloads are opaque strings. Adapters enforce expiry themselves: `get`
/// never returns a payload older than the max age it was stored with.
#[async_trait]
pub trait StorageAdapter: Sync + Send {
    /// Namespace this adapter's keys live under
    fn namespace(&self) -> &str;

    /// Fetch a payload, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a payload for `max_age`
    async fn set(&self, key: &str, payload: String, max_age: MaxAge) -> Result<()>;

    /// Remove a payload, does nothing if absent
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every payload in this adapter's namespace
    async fn clear(&self) -> Result<()>;
}
