//! Message types exchanged with the apply layer.
//!
//! These mirror the shapes of etcd's `etcdserverpb` messages restricted to what
//! the apply layer reads and produces. One-of fields are closed enums so every
//! dispatch point matches exhaustively.

mod raft_internal;
mod rpc;

pub use raft_internal::{InternalRequest, ResponseMessage};
pub use rpc::*;
