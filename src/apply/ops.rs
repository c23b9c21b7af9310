//! Single-operation handlers and the union dispatcher used by transaction
//! branches.

use tracing::{debug, error};

use crate::etcdserverpb::{
    DeleteRangeRequest, DeleteRangeResponse, PutRequest, PutResponse, RangeRequest,
    RangeResponse, RequestUnion, ResponseHeader, ResponseUnion,
};
use crate::storage::KV;

pub fn do_put(kv: &dyn KV, p: &PutRequest) -> PutResponse {
    let revision = kv.put(&p.key, &p.value);
    PutResponse {
        header: ResponseHeader::new(revision),
    }
}

/// Reads the requested range at the current revision.
///
/// # Panics
///
/// A store error here has no recovery path and panics. Compare lookups go
/// through [`super::compare`] instead, where the same error only fails the
/// predicate.
pub fn do_range(kv: &dyn KV, r: &RangeRequest) -> RangeResponse {
    let (kvs, revision) = match kv.range(&r.key, &r.range_end, r.limit, 0) {
        Ok(result) => result,
        Err(e) => {
            error!(key = ?String::from_utf8_lossy(&r.key), error = %e, "range failed");
            panic!("unhandled range error: {}", e);
        }
    };

    RangeResponse {
        header: ResponseHeader::new(revision),
        kvs,
    }
}

/// Deletes the requested range. The deleted count reported by the store is
/// dropped; only the revision reaches the response.
pub fn do_delete_range(kv: &dyn KV, dr: &DeleteRangeRequest) -> DeleteRangeResponse {
    let (deleted, revision) = kv.delete_range(&dr.key, &dr.range_end);
    debug!(deleted, revision, "delete_range applied");
    DeleteRangeResponse {
        header: ResponseHeader::new(revision),
    }
}

/// Runs one branch operation. An empty union is a no-op with an empty
/// response, not an error.
pub fn do_union(kv: &dyn KV, union: &RequestUnion) -> ResponseUnion {
    match union {
        RequestUnion::Range(r) => ResponseUnion::Range(do_range(kv, r)),
        RequestUnion::Put(p) => ResponseUnion::Put(do_put(kv, p)),
        RequestUnion::DeleteRange(dr) => ResponseUnion::DeleteRange(do_delete_range(kv, dr)),
        RequestUnion::Empty => ResponseUnion::Empty,
    }
}
