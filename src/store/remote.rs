//! Redis-backed [`KvConnection`].
//!
//! Wraps `redis::aio::ConnectionManager`, which transparently reconnects after
//! transient transport failures. Every command is bounded by the configured timeout.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{Client, RedisError, Script, aio::ConnectionManager};
use tracing::debug;

use super::{Connector, KeyTtl, KvConnection, StoreError, WriteOp};

/// Deletes the lock only while it still carries the caller's token.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisConnection {
    label: String,
    manager: ConnectionManager,
    command_timeout: Duration,
    release_script: Arc<Script>,
}

impl RedisConnection {
    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if is_connection_error(&err) => Err(StoreError::connection(format!(
                "{} `{op}`: {err}",
                self.label
            ))),
            Ok(Err(err)) => Err(StoreError::command(op, err.to_string())),
            Err(_) => Err(StoreError::timeout(op, self.command_timeout)),
        }
    }
}

fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvConnection for RedisConnection {
    fn label(&self) -> &str {
        &self.label
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: String = self
            .run("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn get_with_ttl(&self, key: &str) -> Result<(Option<Vec<u8>>, KeyTtl), StoreError> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.get(key).ttl(key);
        let (value, ttl): (Option<Vec<u8>>, i64) =
            self.run("get_with_ttl", pipe.query_async(&mut conn)).await?;
        Ok((value, KeyTtl::from_reply(ttl)))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        self.run("get_many", redis::cmd("MGET").arg(keys).query_async(&mut conn))
            .await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        self.run(
            "set_ex",
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query_async(&mut conn),
        )
        .await
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = self
            .run(
                "set_nx_ex",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let mut invocation = self.release_script.key(key);
        invocation.arg(expected);
        let removed: i64 = self
            .run("compare_and_delete", invocation.invoke_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        self.run("delete", redis::cmd("DEL").arg(keys).query_async(&mut conn))
            .await
    }

    async fn scan_match(&self, pattern: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(count.max(1))
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn sorted_range(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        self.run(
            "sorted_range",
            redis::cmd("ZRANGE")
                .arg(key)
                .arg(0)
                .arg(limit as i64 - 1)
                .query_async(&mut conn),
        )
        .await
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                WriteOp::Set { key, value, ttl } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value.as_slice())
                        .arg("EX")
                        .arg(ttl_secs(*ttl))
                        .ignore();
                }
                WriteOp::SortedAdd { key, member, ttl } => {
                    pipe.cmd("ZADD").arg(key).arg(0).arg(member).ignore();
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(*ttl)).ignore();
                }
            }
        }
        let mut conn = self.manager.clone();
        self.run("write_batch", pipe.query_async(&mut conn)).await
    }

    async fn close(&self) {
        // Dropping the last manager clone tears down the socket.
        debug!(connection = %self.label, "closing redis connection");
    }
}

/// Connects one role (primary or backup) to a Redis URL.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    label: &'static str,
    url: String,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl RedisConnector {
    pub fn new(
        label: &'static str,
        url: impl Into<String>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            label,
            url: url.into(),
            connect_timeout,
            command_timeout,
        }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    fn describe(&self) -> String {
        format!("{} redis", self.label)
    }

    async fn connect(&self) -> Result<Arc<dyn KvConnection>, StoreError> {
        let client = Client::open(self.url.as_str())
            .map_err(|err| StoreError::connection(format!("invalid {} url: {err}", self.label)))?;

        let manager = tokio::time::timeout(self.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::timeout("connect", self.connect_timeout))?
            .map_err(|err| StoreError::connection(format!("{}: {err}", self.label)))?;

        let connection = RedisConnection {
            label: self.label.to_string(),
            manager,
            command_timeout: self.command_timeout,
            release_script: Arc::new(Script::new(COMPARE_AND_DELETE)),
        };
        connection.ping().await?;
        Ok(Arc::new(connection))
    }
}
