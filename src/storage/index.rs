//! In-memory key index (etcd's treeIndex).
//!
//! Maps every key to the revisions at which it was written, grouped into
//! generations: a generation starts when the key is created and ends with the
//! tombstone that deletes it. Answers "which revision of this key was live at
//! revision N", which is all the MVCC store needs for current and historical
//! reads.

use std::collections::BTreeMap;
use tracing::trace;

/// A store revision. `main` is the global revision counter, `sub` orders
/// changes that share a main revision.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Revision {
    pub main: i64,
    pub sub: i64,
}

impl Revision {
    pub fn new(main: i64, sub: i64) -> Self {
        Self { main, sub }
    }
}

/// A single lifetime of a key, from creation to (optional) deletion.
#[derive(Clone, Debug)]
struct Generation {
    created: Revision,

    /// Revisions at which the key was written, in increasing order.
    revisions: Vec<Revision>,

    deleted: Option<Revision>,
}

impl Generation {
    fn live_at(&self, revision: i64) -> bool {
        self.created.main <= revision && self.deleted.map_or(true, |del| del.main > revision)
    }
}

#[derive(Clone, Debug, Default)]
struct KeyIndexEntry {
    generations: Vec<Generation>,
}

impl KeyIndexEntry {
    /// Latest write of the key that is visible at `revision`.
    fn revision_at(&self, revision: i64) -> Option<Revision> {
        self.generations
            .iter()
            .rev()
            .find(|gen| gen.live_at(revision))?
            .revisions
            .iter()
            .rfind(|r| r.main <= revision)
            .copied()
    }
}

/// Ordered index of all keys the store has ever seen.
#[derive(Default)]
pub struct KeyIndex {
    tree: BTreeMap<Vec<u8>, KeyIndexEntry>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the revision of `key` visible at `revision`, or `None` if the
    /// key did not exist at that point.
    pub fn get(&self, key: &[u8], revision: i64) -> Option<Revision> {
        self.tree.get(key)?.revision_at(revision)
    }

    /// Records a write of `key`, opening a new generation if the key is new or
    /// was deleted.
    pub fn put(&mut self, key: &[u8], revision: Revision) {
        let entry = self.tree.entry(key.to_vec()).or_default();

        match entry.generations.last_mut() {
            Some(gen) if gen.deleted.is_none() => gen.revisions.push(revision),
            _ => entry.generations.push(Generation {
                created: revision,
                revisions: vec![revision],
                deleted: None,
            }),
        }

        trace!(
            "Index: put key {:?} at revision {:?}",
            String::from_utf8_lossy(key),
            revision
        );
    }

    /// Closes the live generation of `key`. A key without a live generation is
    /// left untouched.
    pub fn tombstone(&mut self, key: &[u8], revision: Revision) {
        let Some(entry) = self.tree.get_mut(key) else {
            return;
        };

        if let Some(gen) = entry.generations.last_mut() {
            if gen.deleted.is_none() {
                gen.deleted = Some(revision);
            }
        }

        trace!(
            "Index: tombstone key {:?} at revision {:?}",
            String::from_utf8_lossy(key),
            revision
        );
    }

    /// Returns the keys in `[start, end)` that were live at `revision`, in key
    /// order, together with their visible revision.
    pub fn range(&self, start: &[u8], end: &[u8], revision: i64) -> Vec<(Vec<u8>, Revision)> {
        if start >= end {
            return Vec::new();
        }

        self.tree
            .range(start.to_vec()..end.to_vec())
            .filter_map(|(key, entry)| entry.revision_at(revision).map(|rev| (key.clone(), rev)))
            .collect()
    }

    /// Number of keys the index knows about, live or deleted.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let mut index = KeyIndex::new();

        index.put(b"key1", Revision::new(1, 0));

        assert_eq!(index.get(b"key1", 1), Some(Revision::new(1, 0)));
        assert_eq!(index.get(b"key1", 0), None);
        assert_eq!(index.get(b"key1", 2), Some(Revision::new(1, 0)));
        assert_eq!(index.get(b"key2", 2), None);
    }

    #[test]
    fn test_multiple_updates() {
        let mut index = KeyIndex::new();

        index.put(b"key1", Revision::new(1, 0));
        index.put(b"key1", Revision::new(3, 0));

        assert_eq!(index.get(b"key1", 2), Some(Revision::new(1, 0)));
        assert_eq!(index.get(b"key1", 3), Some(Revision::new(3, 0)));
        assert_eq!(index.get(b"key1", 5), Some(Revision::new(3, 0)));
    }

    #[test]
    fn test_tombstone() {
        let mut index = KeyIndex::new();

        index.put(b"key1", Revision::new(1, 0));
        index.tombstone(b"key1", Revision::new(3, 0));

        assert_eq!(index.get(b"key1", 2), Some(Revision::new(1, 0)));
        assert_eq!(index.get(b"key1", 3), None);
    }

    #[test]
    fn test_tombstone_unknown_key_is_noop() {
        let mut index = KeyIndex::new();

        index.tombstone(b"ghost", Revision::new(1, 0));

        assert!(index.is_empty());
    }

    #[test]
    fn test_range() {
        let mut index = KeyIndex::new();

        index.put(b"a", Revision::new(1, 0));
        index.put(b"b", Revision::new(2, 0));
        index.put(b"c", Revision::new(3, 0));
        index.put(b"d", Revision::new(4, 0));

        let results = index.range(b"b", b"d", 4);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], (b"b".to_vec(), Revision::new(2, 0)));
        assert_eq!(results[1], (b"c".to_vec(), Revision::new(3, 0)));

        // c did not exist yet at revision 2
        let results = index.range(b"a", b"z", 2);
        assert_eq!(results.len(), 2);

        assert!(index.range(b"d", b"a", 4).is_empty());
    }

    #[test]
    fn test_generation_lifecycle() {
        let mut index = KeyIndex::new();

        index.put(b"key1", Revision::new(1, 0));
        index.tombstone(b"key1", Revision::new(2, 0));
        index.put(b"key1", Revision::new(3, 0));

        assert_eq!(index.get(b"key1", 1), Some(Revision::new(1, 0)));
        assert_eq!(index.get(b"key1", 2), None);
        assert_eq!(index.get(b"key1", 3), Some(Revision::new(3, 0)));
        assert_eq!(index.len(), 1);
    }
}
