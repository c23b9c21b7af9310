//! Evaluation of transaction compare predicates.

use std::cmp::Ordering;

use tracing::{debug, trace};

use crate::etcdserverpb::{Compare, CompareResult, CompareTarget};
use crate::storage::{KeyValue, KV};

/// Evaluates `compares` in order, stopping at the first one that does not
/// hold.
///
/// Returns the combined outcome and the store revision reported by the last
/// successful lookup, 0 if there was none. A store error during a lookup fails
/// the predicate rather than propagating.
///
/// # Panics
///
/// Every compared key must exist: the first record of each lookup is read
/// unconditionally, so a compare against a missing key panics.
pub fn evaluate_compares(kv: &dyn KV, compares: &[Compare]) -> (bool, i64) {
    let mut revision = 0;

    for c in compares {
        let (kvs, rev) = match kv.range(&c.key, &[], 1, 0) {
            Ok(result) => result,
            Err(e) => {
                debug!(key = ?String::from_utf8_lossy(&c.key), error = %e, "compare lookup failed");
                return (false, revision);
            }
        };
        revision = rev;

        if !holds(c, &kvs[0]) {
            trace!(key = ?String::from_utf8_lossy(&c.key), "compare failed");
            return (false, revision);
        }
    }

    (true, revision)
}

/// Whether the stored record satisfies the predicate.
fn holds(c: &Compare, stored: &KeyValue) -> bool {
    let ord = match &c.target {
        CompareTarget::Value(v) => stored.value.as_slice().cmp(v.as_slice()),
        CompareTarget::CreateRevision(rev) => stored.create_revision.cmp(rev),
        CompareTarget::ModRevision(rev) => stored.mod_revision.cmp(rev),
        CompareTarget::Version(version) => stored.version.cmp(version),
    };

    match c.result {
        CompareResult::Equal => ord == Ordering::Equal,
        CompareResult::Greater => ord == Ordering::Greater,
        CompareResult::Less => ord == Ordering::Less,
    }
}
