//! The transaction engine: compare, pick a branch, run it.

use tracing::debug;

use super::compare::evaluate_compares;
use super::ops::do_union;
use crate::etcdserverpb::{ResponseHeader, ResponseUnion, TxnRequest, TxnResponse};
use crate::storage::KV;

/// Applies a conditional transaction.
///
/// Exactly one branch runs. The response revision is the compare baseline
/// plus one when the executed branch has at least one request, whether or not
/// any of them wrote, and the baseline itself when the branch is empty.
pub fn do_txn(kv: &dyn KV, rt: &TxnRequest) -> TxnResponse {
    let (succeeded, baseline) = evaluate_compares(kv, &rt.compare);

    let reqs = if succeeded { &rt.success } else { &rt.failure };
    let responses: Vec<ResponseUnion> = reqs.iter().map(|req| do_union(kv, req)).collect();

    let revision = if responses.is_empty() {
        baseline
    } else {
        baseline + 1
    };

    debug!(
        succeeded,
        ops = responses.len(),
        revision,
        "txn applied"
    );

    TxnResponse {
        header: ResponseHeader::new(revision),
        succeeded,
        responses,
    }
}
