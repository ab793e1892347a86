//! Batched write builder

use crate::{KeyValueStore, Result, SetOptions};
use serde::{Deserialize, Serialize};

/// One queued operation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Set {
        key: String,
        value: String,
        #[serde(default)]
        opts: SetOptions,
    },
    Del {
        key: String,
    },
}

impl BatchOp {
    pub fn key(&self) -> &str {
        match self {
            BatchOp::Set { key, .. } | BatchOp::Del { key } => key,
        }
    }
}

/// Operations queued against a store and sent together on [`Transaction::exec`].
///
/// This is a pipeline, not a compare-and-swap: nothing guards the keys
/// between a caller's reads and the moment the batch lands.
pub struct Transaction<'a> {
    store: &'a dyn KeyValueStore,
    ops: Vec<BatchOp>,
}

impl<'a> Transaction<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn set(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_with(key, value, SetOptions::default())
    }

    pub fn set_with(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        opts: SetOptions,
    ) -> Self {
        self.ops.push(BatchOp::Set {
            key: key.into(),
            value: value.into(),
            opts,
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Del { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Send the queued ops. Returns one success flag per op.
    pub async fn exec(self) -> Result<Vec<bool>> {
        if self.ops.is_empty() {
            return Ok(Vec::new());
        }
        let expected = self.ops.len();
        let results = self.store.exec_batch(self.ops).await?;
        if results.len() != expected {
            return Err(crate::StoreError::UnexpectedReply {
                op: "EXEC",
                reply: format!("{} results for {} queued ops", results.len(), expected),
            });
        }
        Ok(results)
    }
}
