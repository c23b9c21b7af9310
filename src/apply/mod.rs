//! Deterministic evaluation of committed requests.
//!
//! [`evaluate`] is the single entry point: it takes one committed request and a
//! store handle and returns the response. Evaluation is synchronous and
//! sequential, makes no decisions of its own beyond what the request and the
//! store state dictate, and never maintains a revision counter of its own:
//! every revision in a response is either relayed from the store or, for
//! transactions, derived from a store-reported baseline.
//!
//! Replicas stay identical because every one of them runs this same function
//! over the same ordered input. The caller must therefore apply requests one
//! at a time, in commit order; nothing here locks.
//!
//! Error policy differs by call site:
//! - a store error on a direct range read panics
//! - a store error while looking up a compare key fails the transaction
//!   condition and is otherwise swallowed
//! - an empty branch operation yields an empty response slot

pub mod compare;
pub mod ops;
pub mod txn;

#[cfg(test)]
pub(crate) mod testutil;

use tracing::trace;

use crate::etcdserverpb::{InternalRequest, ResponseMessage};
use crate::storage::KV;

pub use compare::evaluate_compares;
pub use ops::{do_delete_range, do_put, do_range, do_union};
pub use txn::do_txn;

/// Per-request execution context.
///
/// Accepted by [`evaluate`] so callers can thread cancellation or deadlines
/// through later; evaluation does not consult it.
#[derive(Clone, Debug, Default)]
pub struct ApplyContext {
    /// Log index of the entry being applied, 0 when not applying from a log.
    pub index: u64,
}

impl ApplyContext {
    pub fn new(index: u64) -> Self {
        Self { index }
    }
}

/// Applies one committed request to `kv`.
pub fn evaluate(_ctx: &ApplyContext, kv: &dyn KV, r: &InternalRequest) -> ResponseMessage {
    trace!(op = r.kind(), "evaluating request");

    match r {
        InternalRequest::Range(rr) => ResponseMessage::Range(do_range(kv, rr)),
        InternalRequest::Put(p) => ResponseMessage::Put(do_put(kv, p)),
        InternalRequest::DeleteRange(dr) => ResponseMessage::DeleteRange(do_delete_range(kv, dr)),
        InternalRequest::Txn(rt) => ResponseMessage::Txn(do_txn(kv, rt)),
    }
}
