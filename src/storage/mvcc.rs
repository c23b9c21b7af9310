//! Multi-Version Concurrency Control (MVCC) store.
//!
//! Every write allocates the next global revision. Each written version of a
//! key is kept in the backend under `{main_be}{sub_be}{key}`, so a scan of the
//! `kv` tree replays the full history in revision order. Deletions are recorded
//! as tombstone records (version 0) at the deleting revision.
//!
//! The store maintains:
//! 1. The revision-keyed records in sled
//! 2. An in-memory [`KeyIndex`] rebuilt from those records on open
//! 3. The current revision counter, the only revision authority in the process

use crate::storage::backend::{KV_TREE, META_TREE};
use crate::storage::{fatal, Backend, KeyIndex, Revision, StorageError, StorageResult, KV};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const APPLIED_INDEX_KEY: &[u8] = b"applied_index";

/// A key-value pair with MVCC metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Vec<u8>,

    /// Revision at which the current generation of the key was created.
    pub create_revision: i64,

    /// Revision of the last write to the key.
    pub mod_revision: i64,

    /// Number of writes since the key was (re)created. Zero marks a tombstone.
    pub version: i64,

    pub value: Vec<u8>,
}

impl KeyValue {
    fn tombstone(key: &[u8], revision: i64) -> Self {
        KeyValue {
            key: key.to_vec(),
            create_revision: 0,
            mod_revision: revision,
            version: 0,
            value: Vec::new(),
        }
    }

    fn is_tombstone(&self) -> bool {
        self.version == 0
    }

    /// Serializes the record: three fixed-size revisions followed by the
    /// length-prefixed key and value.
    fn encode(&self) -> StorageResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(32 + self.key.len() + self.value.len());

        buf.extend_from_slice(&self.create_revision.to_le_bytes());
        buf.extend_from_slice(&self.mod_revision.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());

        buf.extend_from_slice(&len_prefix("key", self.key.len())?);
        buf.extend_from_slice(&self.key);

        buf.extend_from_slice(&len_prefix("value", self.value.len())?);
        buf.extend_from_slice(&self.value);

        Ok(buf)
    }

    fn decode(data: &[u8]) -> StorageResult<Self> {
        let create_revision = read_i64(data, 0)?;
        let mod_revision = read_i64(data, 8)?;
        let version = read_i64(data, 16)?;

        let key_len = read_u32(data, 24)? as usize;
        let key = read_bytes(data, 28, key_len)?;

        let val_offset = 28 + key_len;
        let value_len = read_u32(data, val_offset)? as usize;
        let value = read_bytes(data, val_offset + 4, value_len)?;

        Ok(KeyValue {
            key,
            create_revision,
            mod_revision,
            version,
            value,
        })
    }
}

/// Length prefix for a key or value; records cannot hold fields over `u32::MAX` bytes.
fn len_prefix(field: &str, len: usize) -> StorageResult<[u8; 4]> {
    u32::try_from(len).map(u32::to_le_bytes).map_err(|_| {
        StorageError::Corrupt(format!("{} of {} bytes does not fit a record", field, len))
    })
}

fn truncated(at: usize) -> StorageError {
    StorageError::Corrupt(format!("record truncated at offset {}", at))
}

fn read_i64(data: &[u8], at: usize) -> StorageResult<i64> {
    data.get(at..at + 8)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(i64::from_le_bytes)
        .ok_or_else(|| truncated(at))
}

fn read_u32(data: &[u8], at: usize) -> StorageResult<u32> {
    data.get(at..at + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| truncated(at))
}

fn read_bytes(data: &[u8], at: usize, len: usize) -> StorageResult<Vec<u8>> {
    data.get(at..at + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| truncated(at))
}

/// Builds a `kv` tree key: `{main_be}{sub_be}{key}`.
/// Big-endian keeps the tree sorted by revision.
fn rev_key(revision: Revision, key: &[u8]) -> Vec<u8> {
    let mut rk = Vec::with_capacity(16 + key.len());
    rk.extend_from_slice(&revision.main.to_be_bytes());
    rk.extend_from_slice(&revision.sub.to_be_bytes());
    rk.extend_from_slice(key);
    rk
}

fn parse_rev_key(rk: &[u8]) -> StorageResult<Revision> {
    let main = rk
        .get(0..8)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(i64::from_be_bytes);
    let sub = rk
        .get(8..16)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(i64::from_be_bytes);

    match (main, sub) {
        (Some(main), Some(sub)) => Ok(Revision::new(main, sub)),
        _ => Err(StorageError::Corrupt(format!(
            "revision key too short ({} bytes)",
            rk.len()
        ))),
    }
}

/// The MVCC store.
pub struct MvccStore {
    backend: Arc<Backend>,

    /// Current global revision (monotonically increasing)
    current_revision: AtomicI64,

    key_index: RwLock<KeyIndex>,
}

impl MvccStore {
    /// Opens the store on top of `backend`, replaying any existing history to
    /// rebuild the key index and the current revision.
    pub fn new(backend: Arc<Backend>) -> StorageResult<Arc<Self>> {
        info!("Initializing MVCC store");

        let mut index = KeyIndex::new();
        let mut current_revision = 0i64;

        let records = backend.scan_all(KV_TREE)?;
        let replayed = records.len();
        for (rk, data) in records {
            let revision = parse_rev_key(&rk)?;
            let kv = KeyValue::decode(&data)?;

            if kv.is_tombstone() {
                index.tombstone(&kv.key, revision);
            } else {
                index.put(&kv.key, revision);
            }
            current_revision = current_revision.max(revision.main);
        }

        let store = Arc::new(Self {
            backend,
            current_revision: AtomicI64::new(current_revision),
            key_index: RwLock::new(index),
        });

        info!(
            revision = current_revision,
            records = replayed,
            "MVCC store initialized"
        );

        Ok(store)
    }

    /// Gets the current global revision.
    pub fn current_revision(&self) -> i64 {
        self.current_revision.load(Ordering::SeqCst)
    }

    /// Last log index recorded with [`MvccStore::set_applied_index`], or 0.
    pub fn applied_index(&self) -> StorageResult<u64> {
        match self.backend.get(META_TREE, APPLIED_INDEX_KEY)? {
            Some(raw) => <[u8; 8]>::try_from(raw.as_slice())
                .map(u64::from_be_bytes)
                .map_err(|_| StorageError::Corrupt("invalid applied_index size".to_string())),
            None => Ok(0),
        }
    }

    pub fn set_applied_index(&self, index: u64) -> StorageResult<()> {
        self.backend
            .put(META_TREE, APPLIED_INDEX_KEY, &index.to_be_bytes())?;
        Ok(())
    }

    /// Loads the record written at `revision` for `key`.
    fn load(&self, key: &[u8], revision: Revision) -> StorageResult<KeyValue> {
        let data = self
            .backend
            .get(KV_TREE, &rev_key(revision, key))?
            .ok_or_else(|| {
                StorageError::Corrupt(format!(
                    "index points at missing record {:?} for key {:?}",
                    revision,
                    String::from_utf8_lossy(key)
                ))
            })?;
        KeyValue::decode(&data)
    }

    /// Keys selected by `key`/`range_end` that are live at `revision`. An empty
    /// `range_end` selects exactly `key`.
    fn select(&self, key: &[u8], range_end: &[u8], revision: i64) -> Vec<(Vec<u8>, Revision)> {
        let index = self.key_index.read();
        if range_end.is_empty() {
            index
                .get(key, revision)
                .map(|rev| vec![(key.to_vec(), rev)])
                .unwrap_or_default()
        } else {
            index.range(key, range_end, revision)
        }
    }

    fn read_range(
        &self,
        key: &[u8],
        range_end: &[u8],
        limit: i64,
        range_rev: i64,
    ) -> StorageResult<(Vec<KeyValue>, i64)> {
        let current = self.current_revision();
        if range_rev > current {
            return Err(StorageError::FutureRevision {
                requested: range_rev,
                current,
            });
        }

        let revision = if range_rev <= 0 { current } else { range_rev };
        let limit = if limit > 0 { limit as usize } else { usize::MAX };

        let kvs = self
            .select(key, range_end, revision)
            .into_iter()
            .take(limit)
            .map(|(k, rev)| self.load(&k, rev))
            .collect::<StorageResult<Vec<_>>>()?;

        Ok((kvs, current))
    }

    fn write_put(&self, key: &[u8], value: &[u8]) -> StorageResult<i64> {
        let current = self.current_revision();
        let new_revision = current + 1;

        let prev = match self.key_index.read().get(key, current) {
            Some(rev) => Some(self.load(key, rev)?),
            None => None,
        };

        let kv = KeyValue {
            key: key.to_vec(),
            create_revision: prev.as_ref().map_or(new_revision, |p| p.create_revision),
            mod_revision: new_revision,
            version: prev.as_ref().map_or(1, |p| p.version + 1),
            value: value.to_vec(),
        };

        let revision = Revision::new(new_revision, 0);
        self.backend.put(KV_TREE, &rev_key(revision, key), &kv.encode()?)?;
        self.key_index.write().put(key, revision);
        self.current_revision.store(new_revision, Ordering::SeqCst);

        debug!(
            "Put key {:?} at revision {}",
            String::from_utf8_lossy(key),
            new_revision
        );

        Ok(new_revision)
    }

    fn write_delete_range(&self, key: &[u8], range_end: &[u8]) -> StorageResult<(i64, i64)> {
        let current = self.current_revision();
        let keys = self.select(key, range_end, current);
        if keys.is_empty() {
            return Ok((0, current));
        }

        let new_revision = current + 1;
        let tombstones: Vec<(Revision, Vec<u8>)> = keys
            .into_iter()
            .enumerate()
            .map(|(sub, (k, _))| (Revision::new(new_revision, sub as i64), k))
            .collect();

        let pairs = tombstones
            .iter()
            .map(|(rev, k)| Ok((rev_key(*rev, k), KeyValue::tombstone(k, new_revision).encode()?)))
            .collect::<StorageResult<Vec<(Vec<u8>, Vec<u8>)>>>()?;
        self.backend.batch_put(KV_TREE, &pairs)?;

        {
            let mut index = self.key_index.write();
            for (rev, k) in &tombstones {
                index.tombstone(k, *rev);
            }
        }
        self.current_revision.store(new_revision, Ordering::SeqCst);

        debug!(
            "Deleted {} keys at revision {}",
            tombstones.len(),
            new_revision
        );

        Ok((tombstones.len() as i64, new_revision))
    }

    /// Flushes pending backend writes to disk.
    pub fn flush(&self) -> StorageResult<()> {
        self.backend.flush()?;
        Ok(())
    }
}

impl KV for MvccStore {
    fn range(
        &self,
        key: &[u8],
        range_end: &[u8],
        limit: i64,
        range_rev: i64,
    ) -> StorageResult<(Vec<KeyValue>, i64)> {
        self.read_range(key, range_end, limit, range_rev)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> i64 {
        match self.write_put(key, value) {
            Ok(revision) => revision,
            Err(e) => fatal("put", e),
        }
    }

    fn delete_range(&self, key: &[u8], range_end: &[u8]) -> (i64, i64) {
        match self.write_delete_range(key, range_end) {
            Ok(result) => result,
            Err(e) => fatal("delete_range", e),
        }
    }
}
