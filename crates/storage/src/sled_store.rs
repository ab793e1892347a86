//! Sled-backed store for single-node deployments

use crate::{BatchOp, KeyValueStore, Result, SetOptions, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Value envelope persisted in the tree. Sled has no native TTL, so expiry
/// is checked on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
}

impl StoredValue {
    fn new(value: String, opts: SetOptions) -> Self {
        Self {
            value,
            expires_at: opts.ttl_seconds.map(|ttl| now_secs().saturating_add(ttl)),
        }
    }

    fn is_live(&self, now: u64) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct SledStore {
    db: Db,
    kv: Tree,
}

impl SledStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let kv = db.open_tree("kv")?;
        Ok(Self { db, kv })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<StoredValue> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn read_live(&self, key: &str) -> Result<Option<StoredValue>> {
        let now = now_secs();
        match self.kv.get(key.as_bytes())? {
            Some(raw) => {
                let stored = Self::decode(&raw)?;
                if stored.is_live(now) {
                    Ok(Some(stored))
                } else {
                    self.kv.remove(key.as_bytes())?;
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    fn backend(&self) -> &'static str {
        "sled"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_live(key)?.map(|stored| stored.value))
    }

    async fn set(&self, key: &str, value: &str, opts: SetOptions) -> Result<()> {
        let data = serde_json::to_vec(&StoredValue::new(value.to_string(), opts))?;
        self.kv.insert(key.as_bytes(), data)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read_live(key)?.is_some())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let now = now_secs();
        match self.kv.remove(key.as_bytes())? {
            Some(raw) => Ok(Self::decode(&raw)?.is_live(now)),
            None => Ok(false),
        }
    }

    async fn exec_batch(&self, ops: Vec<BatchOp>) -> Result<Vec<bool>> {
        let now = now_secs();
        let mut encoded = Vec::with_capacity(ops.len());
        for op in &ops {
            let payload = match op {
                BatchOp::Set { value, opts, .. } => Some(serde_json::to_vec(&StoredValue::new(
                    value.clone(),
                    *opts,
                ))?),
                BatchOp::Del { .. } => None,
            };
            encoded.push(payload);
        }

        let outcome: std::result::Result<Vec<bool>, TransactionError<String>> =
            self.kv.transaction(|tx| {
                let mut results = Vec::with_capacity(ops.len());
                for (op, payload) in ops.iter().zip(encoded.iter()) {
                    match (op, payload) {
                        (BatchOp::Set { key, .. }, Some(data)) => {
                            tx.insert(key.as_bytes(), data.as_slice())?;
                            results.push(true);
                        }
                        (BatchOp::Del { key }, _) => {
                            let removed = match tx.remove(key.as_bytes())? {
                                Some(raw) => serde_json::from_slice::<StoredValue>(&raw)
                                    .map(|stored| stored.is_live(now))
                                    .map_err(|err| {
                                        ConflictableTransactionError::Abort(err.to_string())
                                    })?,
                                None => false,
                            };
                            results.push(removed);
                        }
                        (BatchOp::Set { key, .. }, None) => {
                            return Err(ConflictableTransactionError::Abort(format!(
                                "missing payload for {key}"
                            )));
                        }
                    }
                }
                Ok(results)
            });

        outcome.map_err(|err| match err {
            TransactionError::Abort(reason) => StoreError::BatchAborted(reason),
            TransactionError::Storage(err) => StoreError::Database(err),
        })
    }
}
