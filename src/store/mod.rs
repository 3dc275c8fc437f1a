//! Remote key-value store access.
//!
//! Everything above this module talks to the store through [`KvConnection`], obtained
//! from a [`ConnectionProvider`]. The production provider is [`ConnectionManager`],
//! which owns a primary and an optional backup connection and fails over between them.
//! A provider returning `None` means "no cache": callers run the expensive operation
//! directly.

mod manager;
mod memory;
mod remote;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub use manager::{
    ConnectionManager, ConnectionPhase, ConnectionRole, ConnectionState, ConnectionStatus,
    ManagerConfig, StoreStatus,
};
pub use memory::{MemoryConnection, MemoryConnector};
pub use remote::{RedisConnection, RedisConnector};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store operation `{op}` timed out after {timeout_ms}ms")]
    Timeout { op: &'static str, timeout_ms: u64 },
    #[error("store command `{op}` failed: {message}")]
    Command { op: &'static str, message: String },
    #[error("store is unavailable")]
    Unavailable,
    #[error("no store is configured")]
    NotConfigured,
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn command(op: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            op,
            message: message.into(),
        }
    }

    pub fn timeout(op: &'static str, timeout: Duration) -> Self {
        Self::Timeout {
            op,
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Remaining lifetime of a key, as reported alongside a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(Duration),
}

impl KeyTtl {
    /// Interpret a Redis `TTL` reply (`-2` missing, `-1` no expiry, otherwise seconds).
    pub fn from_reply(seconds: i64) -> Self {
        match seconds {
            -2 => Self::Missing,
            s if s < 0 => Self::Persistent,
            s => Self::Expires(Duration::from_secs(s as u64)),
        }
    }

    pub fn remaining_secs(&self) -> Option<u64> {
        match self {
            Self::Expires(remaining) => Some(remaining.as_secs()),
            _ => None,
        }
    }
}

/// One write inside a pipelined batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// `SET key value EX ttl`
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Duration,
    },
    /// `ZADD key 0 member` followed by `EXPIRE key ttl`
    SortedAdd {
        key: String,
        member: String,
        ttl: Duration,
    },
}

/// Commands the cache and search layers need from the store.
#[async_trait]
pub trait KvConnection: Send + Sync {
    /// Short label for logs, e.g. `primary` or `memory`.
    fn label(&self) -> &str;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Value and remaining TTL of `key` in a single round trip.
    async fn get_with_ttl(&self, key: &str) -> Result<(Option<Vec<u8>>, KeyTtl), StoreError>;

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Atomic set-if-absent with expiry. Returns `true` when the key was written.
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration)
    -> Result<bool, StoreError>;

    /// Delete `key` only if it still holds `expected`. Returns `true` when deleted.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError>;

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Cursor-walk every key matching the glob `pattern`.
    async fn scan_match(&self, pattern: &str, count: usize) -> Result<Vec<String>, StoreError>;

    /// Lowest `limit` members of a sorted set.
    async fn sorted_range(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Apply `ops` in one pipelined round trip.
    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    async fn close(&self) {}
}

/// Establishes connections for one role.
#[async_trait]
pub trait Connector: Send + Sync {
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn KvConnection>, StoreError>;
}

/// Source of the currently active connection.
pub trait ConnectionProvider: Send + Sync {
    /// Never blocks. `None` means the caller should behave as if there were no cache.
    fn active_connection(&self) -> Option<Arc<dyn KvConnection>>;

    fn is_ready(&self) -> bool {
        self.active_connection().is_some()
    }
}

/// Provider that always hands out the same connection (or none).
#[derive(Clone, Default)]
pub struct FixedProvider {
    connection: Option<Arc<dyn KvConnection>>,
}

impl FixedProvider {
    pub fn new(connection: Arc<dyn KvConnection>) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    pub fn unavailable() -> Self {
        Self { connection: None }
    }
}

impl ConnectionProvider for FixedProvider {
    fn active_connection(&self) -> Option<Arc<dyn KvConnection>> {
        self.connection.clone()
    }
}

/// Escape glob metacharacters so `input` matches literally inside a `SCAN MATCH` pattern.
pub fn escape_glob(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\' | '^') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Scan for `pattern` and delete the matches in batches of `batch_size`.
///
/// Returns the number of keys the store reported as deleted.
pub async fn scan_delete(
    conn: &dyn KvConnection,
    pattern: &str,
    batch_size: usize,
) -> Result<u64, StoreError> {
    let batch_size = batch_size.max(1);
    let keys = conn.scan_match(pattern, batch_size).await?;
    let mut deleted = 0;
    for chunk in keys.chunks(batch_size) {
        deleted += conn.delete(chunk).await?;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_reply_mapping() {
        assert_eq!(KeyTtl::from_reply(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_reply(-1), KeyTtl::Persistent);
        assert_eq!(
            KeyTtl::from_reply(42),
            KeyTtl::Expires(Duration::from_secs(42))
        );
        assert_eq!(KeyTtl::from_reply(42).remaining_secs(), Some(42));
        assert_eq!(KeyTtl::Persistent.remaining_secs(), None);
    }

    #[test]
    fn escape_glob_neutralises_metacharacters() {
        assert_eq!(escape_glob("nexon ev"), "nexon ev");
        assert_eq!(escape_glob("a*b?c[d]"), "a\\*b\\?c\\[d\\]");
        assert_eq!(escape_glob("back\\slash"), "back\\\\slash");
    }

    #[tokio::test]
    async fn scan_delete_removes_every_match_in_batches() {
        let conn = MemoryConnection::new("memory");
        for i in 0..25 {
            conn.set_ex(&format!("cache:v1:brands:{i}"), b"x", Duration::from_secs(60))
                .await
                .unwrap();
        }
        conn.set_ex("cache:v1:models:1", b"x", Duration::from_secs(60))
            .await
            .unwrap();

        let deleted = scan_delete(&conn, "cache:v1:brands:*", 10).await.unwrap();

        assert_eq!(deleted, 25);
        assert!(
            conn.scan_match("cache:v1:brands:*", 10)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(conn.scan_match("cache:*", 10).await.unwrap().len(), 1);
        assert_eq!(conn.delete_calls(), 3);
    }

    #[test]
    fn fixed_provider_reports_readiness() {
        let ready = FixedProvider::new(Arc::new(MemoryConnection::new("memory")));
        assert!(ready.is_ready());
        assert!(!FixedProvider::unavailable().is_ready());
    }
}
