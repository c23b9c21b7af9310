//! Request and response messages of the KV API.

use serde::{Deserialize, Serialize};

use crate::storage::KeyValue;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// The store revision observed after the request was applied.
    pub revision: i64,
}

impl ResponseHeader {
    pub fn new(revision: i64) -> Self {
        Self { revision }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    pub key: Vec<u8>,
    /// Exclusive upper bound; empty means exactly `key`.
    #[serde(default)]
    pub range_end: Vec<u8>,
    /// Maximum number of keys returned; zero or negative means no limit.
    #[serde(default)]
    pub limit: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeResponse {
    pub header: ResponseHeader,
    pub kvs: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub header: ResponseHeader,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRangeRequest {
    pub key: Vec<u8>,
    #[serde(default)]
    pub range_end: Vec<u8>,
}

/// Carries only the header: the number of deleted keys is not reported.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRangeResponse {
    pub header: ResponseHeader,
}

/// One operation of a transaction branch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestUnion {
    Range(RangeRequest),
    Put(PutRequest),
    DeleteRange(DeleteRangeRequest),
    /// No operation populated. Executes as a no-op with an empty response.
    #[default]
    Empty,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseUnion {
    Range(RangeResponse),
    Put(PutResponse),
    DeleteRange(DeleteRangeResponse),
    #[default]
    Empty,
}

/// Which attribute of the stored key a [`Compare`] inspects, carrying the
/// value it is compared against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareTarget {
    Value(Vec<u8>),
    CreateRevision(i64),
    ModRevision(i64),
    Version(i64),
}

/// The relation the stored attribute must have to the expected value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareResult {
    Equal,
    Greater,
    Less,
}

/// A predicate on a single key, evaluated against current store state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compare {
    pub key: Vec<u8>,
    pub result: CompareResult,
    pub target: CompareTarget,
}

impl Compare {
    pub fn new(key: impl Into<Vec<u8>>, target: CompareTarget, result: CompareResult) -> Self {
        Self {
            key: key.into(),
            result,
            target,
        }
    }
}

/// A conditional transaction: when every compare holds the `success` branch
/// runs, otherwise the `failure` branch does.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnRequest {
    #[serde(default)]
    pub compare: Vec<Compare>,
    #[serde(default)]
    pub success: Vec<RequestUnion>,
    #[serde(default)]
    pub failure: Vec<RequestUnion>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResponse {
    pub header: ResponseHeader,
    pub succeeded: bool,
    /// One entry per executed branch request, in branch order.
    pub responses: Vec<ResponseUnion>,
}
