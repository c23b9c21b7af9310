//! Sled-backed persistent storage backend.
//!
//! The backend is a thin layer over a sled database with two logical trees:
//! - `kv`: every key revision, keyed by `{revision_be_bytes}{key_bytes}`
//! - `meta`: apply-layer bookkeeping such as the last applied log index
//!
//! The MVCC store above it owns all interpretation of the bytes.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Tree holding revision-keyed key-value records.
pub const KV_TREE: &str = "kv";

/// Tree holding apply-layer metadata.
pub const META_TREE: &str = "meta";

/// Backend storage errors.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Sled error: {0}")]
    SledError(#[from] sled::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tree not found: {0}")]
    TreeNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Configuration for the backend storage.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Path to the data directory where sled stores all files.
    pub data_dir: PathBuf,

    /// Maximum page cache size in megabytes.
    pub cache_size_mb: u64,

    /// How often sled flushes dirty pages to disk, in milliseconds.
    pub flush_interval_ms: u64,

    /// Remove the database files when the backend is dropped.
    pub temporary: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_size_mb: 256,
            flush_interval_ms: 1000,
            temporary: false,
        }
    }
}

/// The persistent storage backend using sled.
pub struct Backend {
    db: sled::Db,

    /// Revision-keyed key-value records.
    kv_tree: sled::Tree,

    meta_tree: sled::Tree,
}

impl Backend {
    /// Opens (or creates) the backend described by `config`.
    pub fn new(config: BackendConfig) -> BackendResult<Arc<Self>> {
        debug!("Initializing storage backend at {:?}", config.data_dir);

        std::fs::create_dir_all(&config.data_dir)?;

        let flush_every = if config.flush_interval_ms == 0 {
            None
        } else {
            Some(config.flush_interval_ms)
        };

        let db = sled::Config::new()
            .path(&config.data_dir)
            .cache_capacity(config.cache_size_mb * 1024 * 1024)
            .flush_every_ms(flush_every)
            .temporary(config.temporary)
            .open()
            .map_err(|e| {
                BackendError::ConfigError(format!("Failed to open sled database: {}", e))
            })?;

        let kv_tree = db.open_tree(KV_TREE)?;
        let meta_tree = db.open_tree(META_TREE)?;

        info!(
            "Storage backend initialized with cache_size={}MB, flush_interval={}ms",
            config.cache_size_mb, config.flush_interval_ms
        );

        Ok(Arc::new(Self {
            db,
            kv_tree,
            meta_tree,
        }))
    }

    fn get_tree(&self, tree_name: &str) -> BackendResult<&sled::Tree> {
        match tree_name {
            KV_TREE => Ok(&self.kv_tree),
            META_TREE => Ok(&self.meta_tree),
            _ => Err(BackendError::TreeNotFound(tree_name.to_string())),
        }
    }

    /// Stores a key-value pair in the specified tree.
    pub fn put(&self, tree_name: &str, key: &[u8], value: &[u8]) -> BackendResult<()> {
        let tree = self.get_tree(tree_name)?;
        tree.insert(key, value)?;
        Ok(())
    }

    /// Retrieves a value by key from the specified tree.
    pub fn get(&self, tree_name: &str, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        let tree = self.get_tree(tree_name)?;
        Ok(tree.get(key)?.map(|v| v.to_vec()))
    }

    /// Writes multiple key-value pairs atomically.
    pub fn batch_put(&self, tree_name: &str, pairs: &[(Vec<u8>, Vec<u8>)]) -> BackendResult<()> {
        let tree = self.get_tree(tree_name)?;
        let mut batch = sled::Batch::default();

        for (key, value) in pairs {
            batch.insert(key.as_slice(), value.as_slice());
        }

        tree.apply_batch(batch)?;
        Ok(())
    }

    /// Returns every key-value pair of the tree in key order.
    pub fn scan_all(&self, tree_name: &str) -> BackendResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let tree = self.get_tree(tree_name)?;
        let mut results = Vec::new();

        for item in tree.iter() {
            let (k, v) = item?;
            results.push((k.to_vec(), v.to_vec()));
        }

        Ok(results)
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> BackendResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
