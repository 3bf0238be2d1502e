#[macro_use]
extern crate log;

use cached::proc_macro::cached;
use config::{Config, File, FileFormat};
use futures_locks::RwLock;
use once_cell::sync::Lazy;
use serde::Deserialize;

static CONFIG_BUILDER: Lazy<RwLock<Config>> = Lazy::new(|| {
    RwLock::new({
        let mut builder = Config::builder().add_source(File::from_str(
            include_str!("../Idmp.toml"),
            FileFormat::Toml,
        ));

        if std::path::Path::new("Idmp.toml").exists() {
            builder = builder.add_source(File::new("Idmp.toml", FileFormat::Toml));
        }

        builder.build().expect("valid Idmp.toml")
    })
});

/// Defaults for coalesced calls
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Options {
    pub max_retry: u32,
    /// Milliseconds, `inf` disables expiry
    pub max_age: f64,
    /// Milliseconds
    pub min_retry_delay: u64,
    /// Milliseconds
    pub max_retry_delay: u64,
    /// Debug integrity checks, defaults to whether debug assertions are enabled
    pub integrity: Option<bool>,
}

impl Options {
    /// Whether integrity checks should run for calls built from this section
    pub fn integrity_enabled(&self) -> bool {
        self.integrity.unwrap_or(cfg!(debug_assertions))
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    Reference,
    Filesystem,
    Redis,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    pub driver: StorageDriver,
    pub namespace: String,
    pub directory: String,
    pub memory_cache: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub options: Options,
    pub storage: Storage,
}

pub async fn init() {
    info!(":: idmp configuration ::\n{:?}", config().await);
}

pub async fn read() -> Config {
    CONFIG_BUILDER.read().await.clone()
}

#[cached(time = 30)]
pub async fn config() -> Settings {
    read()
        .await
        .try_deserialize::<Settings>()
        .expect("Idmp.toml matches the settings schema")
}
