//! In-memory `KV` used by the apply unit tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use crate::storage::{KeyValue, StorageError, StorageResult, KV};

/// Keeps only the latest version of each key and records every call made
/// against it.
#[derive(Default)]
pub struct MemStore {
    kvs: RefCell<BTreeMap<Vec<u8>, KeyValue>>,
    revision: Cell<i64>,
    ops: RefCell<Vec<String>>,
    fail_ranges: Cell<bool>,
}

impl MemStore {
    /// Makes every subsequent `range` call fail.
    pub fn fail_ranges(&self) {
        self.fail_ranges.set(true);
    }

    pub fn revision(&self) -> i64 {
        self.revision.get()
    }

    pub fn calls(&self) -> usize {
        self.ops.borrow().len()
    }

    /// Calls made so far, as `"<op> <key>"`.
    pub fn ops(&self) -> Vec<String> {
        self.ops.borrow().clone()
    }

    /// Forgets the calls recorded so far, e.g. the ones made while seeding.
    pub fn clear_ops(&self) {
        self.ops.borrow_mut().clear();
    }

    pub fn get(&self, key: &str) -> Option<KeyValue> {
        self.kvs.borrow().get(key.as_bytes()).cloned()
    }

    fn record(&self, op: &str, key: &[u8]) {
        self.ops
            .borrow_mut()
            .push(format!("{} {}", op, String::from_utf8_lossy(key)));
    }

    fn select(&self, key: &[u8], range_end: &[u8]) -> Vec<Vec<u8>> {
        let kvs = self.kvs.borrow();
        if range_end.is_empty() {
            kvs.get(key).map(|kv| vec![kv.key.clone()]).unwrap_or_default()
        } else if key >= range_end {
            Vec::new()
        } else {
            kvs.range(key.to_vec()..range_end.to_vec())
                .map(|(k, _)| k.clone())
                .collect()
        }
    }
}

impl KV for MemStore {
    fn range(
        &self,
        key: &[u8],
        range_end: &[u8],
        limit: i64,
        _range_rev: i64,
    ) -> StorageResult<(Vec<KeyValue>, i64)> {
        self.record("range", key);
        if self.fail_ranges.get() {
            return Err(StorageError::Corrupt("injected range failure".to_string()));
        }

        let limit = if limit > 0 { limit as usize } else { usize::MAX };
        let kvs = self.kvs.borrow();
        let records = self
            .select(key, range_end)
            .iter()
            .take(limit)
            .filter_map(|k| kvs.get(k).cloned())
            .collect();
        Ok((records, self.revision.get()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> i64 {
        self.record("put", key);
        let revision = self.revision.get() + 1;
        self.revision.set(revision);

        let mut kvs = self.kvs.borrow_mut();
        let prev = kvs.get(key);
        let kv = KeyValue {
            key: key.to_vec(),
            create_revision: prev.map_or(revision, |p| p.create_revision),
            mod_revision: revision,
            version: prev.map_or(1, |p| p.version + 1),
            value: value.to_vec(),
        };
        kvs.insert(key.to_vec(), kv);
        revision
    }

    fn delete_range(&self, key: &[u8], range_end: &[u8]) -> (i64, i64) {
        self.record("delete", key);
        let keys = self.select(key, range_end);
        if keys.is_empty() {
            return (0, self.revision.get());
        }

        let revision = self.revision.get() + 1;
        self.revision.set(revision);
        let mut kvs = self.kvs.borrow_mut();
        for k in &keys {
            kvs.remove(k);
        }
        (keys.len() as i64, revision)
    }
}
