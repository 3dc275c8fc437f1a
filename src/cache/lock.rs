//! Fill lock for the stampede protocol.
//!
//! The lock is a `SET NX EX` on `lock:<cache-key>` holding a random token. Release is a
//! compare-and-delete on that token, so a holder whose lock already expired (and was
//! taken by someone else) cannot release the newer lock.

use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::store::{KvConnection, StoreError};

use super::keys::CacheKey;

/// Proof of lock ownership. Must be released explicitly; otherwise it expires.
#[derive(Debug)]
#[must_use = "a held fill lock should be released once the entry is written"]
pub struct FillLock {
    key: String,
    token: String,
}

#[derive(Debug)]
pub enum LockOutcome {
    Acquired(FillLock),
    /// Another caller holds the lock. Expected under load; not an error.
    Contended,
}

impl FillLock {
    pub async fn acquire(
        conn: &dyn KvConnection,
        key: &CacheKey,
        ttl: Duration,
    ) -> Result<LockOutcome, StoreError> {
        let lock_key = key.lock_key();
        let token = Uuid::new_v4().to_string();
        if conn.set_nx_ex(&lock_key, token.as_bytes(), ttl).await? {
            Ok(LockOutcome::Acquired(Self {
                key: lock_key,
                token,
            }))
        } else {
            Ok(LockOutcome::Contended)
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns `false` when the lock had already expired or changed hands.
    pub async fn release(self, conn: &dyn KvConnection) -> Result<bool, StoreError> {
        let released = conn
            .compare_and_delete(&self.key, self.token.as_bytes())
            .await?;
        if !released {
            debug!(lock = %self.key, "fill lock expired before release");
        }
        Ok(released)
    }
}
