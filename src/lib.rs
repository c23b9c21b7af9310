//! # rusd-apply: the deterministic apply layer of rusd
//!
//! Every committed request passes through this crate on its way into the
//! key-value store. Given the same store state and the same ordered stream of
//! committed requests, every replica produces byte-identical responses and
//! identical store state. It provides:
//!
//! - **Request evaluation**: range, put and delete-range against a versioned store
//! - **Transactions**: multi-key compare, then one of two branches, atomically
//! - **MVCC storage**: a sled-backed revisioned store behind the [`storage::KV`] trait
//! - **Apply server**: in-order application of committed log entries
//!
//! # Usage
//!
//! ```bash
//! rusd-apply --data-dir default.rusd --input committed.jsonl
//! ```

pub mod apply;
pub mod etcdserverpb;
pub mod server;
pub mod storage;

// Re-export main types at crate root for convenience
pub use apply::{evaluate, ApplyContext};
pub use etcdserverpb::{InternalRequest, ResponseMessage};
pub use server::{ApplyServer, Entry, ServerConfig};
pub use storage::{Backend, KeyValue, MvccStore, KV};
