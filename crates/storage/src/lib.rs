//! Key-value persistence for Portfoliofy
//!
//! The registry and the HTTP layer only ever talk to a [`KeyValueStore`]:
//! plain string keys, string values, and a batched write primitive. Batches
//! are queued and sent together but carry no compare-and-swap guarantee.
//! Backends are free to apply them more strongly (the in-memory and sled
//! stores do), but callers must not rely on it.

pub mod errors;
pub mod memory;
pub mod redis_store;
pub mod sled_store;
pub mod transaction;

pub use errors::*;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use sled_store::SledStore;
pub use transaction::{BatchOp, Transaction};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Options accepted by [`KeyValueStore::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOptions {
    /// Expire the key after this many seconds. `None` keeps it forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl SetOptions {
    pub fn with_ttl(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds: Some(ttl_seconds),
        }
    }
}

/// Abstract key-value store.
///
/// Every method reports infrastructure faults as [`StoreError`]. Business
/// outcomes (key missing, nothing deleted) are ordinary return values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend label used in logs and health output.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, opts: SetOptions) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete `key`, returning `true` when a key was actually removed.
    async fn del(&self, key: &str) -> Result<bool>;

    /// Execute a queued batch.
    ///
    /// The returned vector has one entry per op, in order. A `Set` entry is
    /// `true` when the write was acknowledged; a `Del` entry is `true` when
    /// exactly one key was removed.
    async fn exec_batch(&self, ops: Vec<BatchOp>) -> Result<Vec<bool>>;
}

impl<'s> dyn KeyValueStore + 's {
    /// Start a batched write against this store.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction::new(self)
    }
}
