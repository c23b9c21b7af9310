//! The request carried by a committed raft entry and its matching response.

use serde::{Deserialize, Serialize};

use super::rpc::*;

/// A committed request. Exactly one operation per entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternalRequest {
    Range(RangeRequest),
    Put(PutRequest),
    DeleteRange(DeleteRangeRequest),
    Txn(TxnRequest),
}

impl InternalRequest {
    /// Encodes the request as a raft entry payload.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes a raft entry payload.
    pub fn decode(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// Short operation name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InternalRequest::Range(_) => "range",
            InternalRequest::Put(_) => "put",
            InternalRequest::DeleteRange(_) => "delete_range",
            InternalRequest::Txn(_) => "txn",
        }
    }
}

impl From<RangeRequest> for InternalRequest {
    fn from(r: RangeRequest) -> Self {
        InternalRequest::Range(r)
    }
}

impl From<PutRequest> for InternalRequest {
    fn from(r: PutRequest) -> Self {
        InternalRequest::Put(r)
    }
}

impl From<DeleteRangeRequest> for InternalRequest {
    fn from(r: DeleteRangeRequest) -> Self {
        InternalRequest::DeleteRange(r)
    }
}

impl From<TxnRequest> for InternalRequest {
    fn from(r: TxnRequest) -> Self {
        InternalRequest::Txn(r)
    }
}

/// The response to an [`InternalRequest`], tagged the same way.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseMessage {
    Range(RangeResponse),
    Put(PutResponse),
    DeleteRange(DeleteRangeResponse),
    Txn(TxnResponse),
}

impl ResponseMessage {
    pub fn header(&self) -> &ResponseHeader {
        match self {
            ResponseMessage::Range(r) => &r.header,
            ResponseMessage::Put(r) => &r.header,
            ResponseMessage::DeleteRange(r) => &r.header,
            ResponseMessage::Txn(r) => &r.header,
        }
    }

    pub fn revision(&self) -> i64 {
        self.header().revision
    }
}
