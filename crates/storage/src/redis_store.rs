//! Redis-backed store
//!
//! Batches go out as a `MULTI`/`EXEC` pipeline. No `WATCH` is issued, so a
//! batch is applied as a unit but nothing protects the keys a caller read
//! before queueing it.

use crate::{BatchOp, KeyValueStore, Result, SetOptions, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Value};
use tracing::debug;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a managed connection to `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| StoreError::Connection(format!("invalid redis url: {err}")))?;
        let conn = client.get_connection_manager().await?;
        debug!("Connected to redis");
        Ok(Self { conn })
    }

    fn set_cmd(key: &str, value: &str, opts: SetOptions) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = opts.ttl_seconds {
            cmd.arg("EX").arg(ttl.max(1));
        }
        cmd
    }
}

/// Map a raw `EXEC` reply entry onto the store's success convention:
/// `SET` must answer `OK`, `DEL` must report exactly one removed key.
pub(crate) fn step_succeeded(op: &BatchOp, reply: &Value) -> bool {
    match (op, reply) {
        (BatchOp::Set { .. }, Value::Okay) => true,
        (BatchOp::Set { .. }, Value::Status(status)) => status.eq_ignore_ascii_case("OK"),
        (BatchOp::Del { .. }, Value::Int(removed)) => *removed == 1,
        _ => false,
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, opts: SetOptions) -> Result<()> {
        let mut conn = self.conn.clone();
        let reply: Value = Self::set_cmd(key, value, opts)
            .query_async(&mut conn)
            .await?;
        match reply {
            Value::Okay => Ok(()),
            Value::Status(ref status) if status.eq_ignore_ascii_case("OK") => Ok(()),
            other => Err(StoreError::UnexpectedReply {
                op: "SET",
                reply: format!("{other:?}"),
            }),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed == 1)
    }

    async fn exec_batch(&self, ops: Vec<BatchOp>) -> Result<Vec<bool>> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                BatchOp::Set { key, value, opts } => {
                    pipe.add_command(Self::set_cmd(key, value, *opts));
                }
                BatchOp::Del { key } => {
                    pipe.cmd("DEL").arg(key);
                }
            }
        }

        let mut conn = self.conn.clone();
        let replies: Vec<Value> = pipe.query_async(&mut conn).await?;
        if replies.len() != ops.len() {
            return Err(StoreError::BatchAborted(format!(
                "EXEC returned {} replies for {} commands",
                replies.len(),
                ops.len()
            )));
        }

        Ok(ops
            .iter()
            .zip(replies.iter())
            .map(|(op, reply)| step_succeeded(op, reply))
            .collect())
    }
}
