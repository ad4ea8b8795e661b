//! 基础设施层（Infrastructure）
//!
//! 持有外部资源，只暴露能力，不认识回答、猜测这些业务概念

pub mod connectivity;
pub mod document_store;
pub mod kv_store;

pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use document_store::{
    DocRef, DocumentChange, MemoryStore, ReadModifyWriteFn, TransactionFn, TransactionalStore,
    WriteOp,
};
pub use kv_store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
