//! The apply server: feeds committed entries to the evaluator, one at a time.
//!
//! This is the caller the evaluator relies on for ordering. It owns:
//! - the MVCC store the entries are applied to
//! - the applied index, persisted in the backend so a restart skips entries
//!   that were already applied
//! - the [`Wait`] registry used to hand each result to its proposer
//!
//! Entries arrive in commit order over an mpsc channel (see [`ApplyServer::run`])
//! or directly through [`ApplyServer::apply_entry`]. Both paths take the same
//! mutex, so at most one evaluation is in flight against the store.

pub mod wait;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::apply::{evaluate, ApplyContext};
use crate::etcdserverpb::{InternalRequest, ResponseMessage};
use crate::storage::{fatal, Backend, BackendConfig, MvccStore, StorageError};

pub use wait::Wait;

/// Errors that stop the apply loop.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("entry {index} does not follow applied index {applied}")]
    OutOfOrder { index: u64, applied: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A committed log entry. `data` holds an encoded [`InternalRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub data: Vec<u8>,
}

impl Entry {
    pub fn new(index: u64, term: u64, request: &InternalRequest) -> serde_json::Result<Self> {
        Ok(Self {
            index,
            term,
            data: request.encode()?,
        })
    }
}

/// Configuration for the apply server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Human-readable name for this member, used in logs.
    pub name: String,

    /// Path to the data directory.
    pub data_dir: PathBuf,

    /// Backend page cache size in megabytes.
    pub cache_size_mb: u64,

    /// Backend flush interval in milliseconds; 0 disables periodic flushing.
    pub flush_interval_ms: u64,

    /// Capacity of the channel feeding committed entries to the apply loop.
    pub apply_channel_capacity: usize,

    /// Discard the data directory when the server is dropped.
    pub temporary: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            data_dir: PathBuf::from("default.rusd"),
            cache_size_mb: 256,
            flush_interval_ms: 1000,
            apply_channel_capacity: 1024,
            temporary: false,
        }
    }
}

impl ServerConfig {
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            data_dir: self.data_dir.clone(),
            cache_size_mb: self.cache_size_mb,
            flush_interval_ms: self.flush_interval_ms,
            temporary: self.temporary,
        }
    }
}

pub struct ApplyServer {
    config: ServerConfig,
    store: Arc<MvccStore>,
    wait: Arc<Wait>,
    /// Last applied log index. Held for the whole of each application.
    applied_index: Mutex<u64>,
}

impl ApplyServer {
    /// Opens the store under `config.data_dir` and resumes from the persisted
    /// applied index.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        info!(
            name = %config.name,
            data_dir = ?config.data_dir,
            "Initializing apply server"
        );

        let backend = Backend::new(config.backend_config())?;
        let store = MvccStore::new(backend)?;
        let applied_index = store.applied_index()?;

        info!(
            applied_index,
            revision = store.current_revision(),
            "Apply server ready"
        );

        Ok(Self {
            config,
            store,
            wait: Arc::new(Wait::new()),
            applied_index: Mutex::new(applied_index),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MvccStore> {
        &self.store
    }

    pub fn wait(&self) -> &Arc<Wait> {
        &self.wait
    }

    pub fn applied_index(&self) -> u64 {
        *self.applied_index.lock()
    }

    /// Applies one committed entry.
    ///
    /// Entries at or below the applied index were applied before and return
    /// `Ok(None)`; a waiter registered for one is dropped. An entry that skips
    /// ahead of `applied + 1` is refused.
    ///
    /// # Panics
    ///
    /// Panics if the payload does not decode to a known request: the entry is
    /// already committed, so this replica cannot apply it and must not skip
    /// it either. Also panics if the applied index cannot be persisted after
    /// the entry has been evaluated.
    pub fn apply_entry(&self, entry: &Entry) -> Result<Option<ResponseMessage>, ApplyError> {
        let mut applied = self.applied_index.lock();

        if entry.index <= *applied {
            debug!(index = entry.index, applied = *applied, "Skipping applied entry");
            self.wait.cancel(entry.index);
            return Ok(None);
        }
        if entry.index != *applied + 1 {
            return Err(ApplyError::OutOfOrder {
                index: entry.index,
                applied: *applied,
            });
        }

        let request = match InternalRequest::decode(&entry.data) {
            Ok(r) => r,
            Err(e) => {
                error!(index = entry.index, term = entry.term, error = %e, "Unrecognized request");
                panic!("unrecognized request in entry {}: {}", entry.index, e);
            }
        };

        let ctx = ApplyContext::new(entry.index);
        let resp = evaluate(&ctx, &*self.store, &request);

        // The store already holds this entry's effects; failing here and
        // retrying later would apply it twice.
        if let Err(e) = self.store.set_applied_index(entry.index) {
            fatal("set_applied_index", e);
        }
        *applied = entry.index;

        debug!(
            index = entry.index,
            op = request.kind(),
            revision = resp.revision(),
            "Applied entry"
        );

        self.wait.trigger(entry.index, resp.clone());
        Ok(Some(resp))
    }

    /// Applies entries from `apply_rx` until the channel closes or `shutdown`
    /// completes. An apply error stops the loop and is returned.
    pub async fn run<F>(
        &self,
        mut apply_rx: mpsc::Receiver<Entry>,
        shutdown: F,
    ) -> Result<(), ApplyError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Apply loop received shutdown");
                    break;
                }
                entry = apply_rx.recv() => {
                    let Some(entry) = entry else {
                        info!("Apply channel closed");
                        break;
                    };
                    if let Err(e) = self.apply_entry(&entry) {
                        error!(index = entry.index, error = %e, "Apply loop stopped");
                        return Err(e);
                    }
                }
            }
        }

        self.store.flush()?;
        Ok(())
    }
}
