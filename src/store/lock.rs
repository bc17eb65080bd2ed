//! Per-stack advisory lock.
//!
//! PostgreSQL advisory locks are session-scoped, so the guard pins one
//! pool connection for the lock's lifetime. Release happens on every exit
//! path: explicitly via [`StackLock::release`] with a fresh 5-second
//! deadline, or from `Drop`, where the connection is detached from the
//! pool and unlocked (or closed, which also releases the lock) on a
//! spawned task. A connection holding a lock is never returned to the
//! pool.

use super::Store;
use crate::error::Result;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Postgres};
use std::time::Duration;
use tracing::{debug, warn};

/// Deadline for lock release, independent of any parent context
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Guard for an acquired per-stack apply lock
#[derive(Debug)]
pub struct StackLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl Store {
    /// Try to acquire the exclusive apply lock for a stack.
    ///
    /// Returns `None` without blocking when another session holds it.
    pub async fn try_lock_stack(&self, stack_id: i64) -> Result<Option<StackLock>> {
        let mut conn = self.pool().acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(stack_id)
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            debug!(stack_id, "acquired stack apply lock");
            Ok(Some(StackLock {
                conn: Some(conn),
                key: stack_id,
            }))
        } else {
            Ok(None)
        }
    }
}

impl StackLock {
    /// Release the lock with a bounded deadline.
    ///
    /// A release timeout closes the pinned connection instead, which
    /// releases the session-scoped lock server-side.
    pub async fn release(mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let mut conn = conn.detach();

        let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut conn);
        match tokio::time::timeout(RELEASE_TIMEOUT, unlock).await {
            Ok(result) => {
                result?;
                debug!(stack_id = self.key, "released stack apply lock");
            }
            Err(_) => {
                warn!(stack_id = self.key, "lock release timed out, closing connection");
            }
        }
        // Closing the session drops any lock the unlock call missed.
        let _ = tokio::time::timeout(RELEASE_TIMEOUT, conn.close()).await;
        Ok(())
    }
}

impl Drop for StackLock {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut conn = conn.detach();
        let key = self.key;

        // Unwind path (error return or panic in the applier): unlock on a
        // detached task with the same bounded deadline. Without a runtime
        // the connection drop closes the session, which releases the lock.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
                    .bind(key)
                    .execute(&mut conn);
                if tokio::time::timeout(RELEASE_TIMEOUT, unlock).await.is_err() {
                    warn!(stack_id = key, "lock release timed out in drop");
                }
                let _ = tokio::time::timeout(RELEASE_TIMEOUT, conn.close()).await;
            });
        }
    }
}
