//! Per-key write locks shared by the memory backends.
//!
//! A lock is `{owner_task_id, expires_at}` keyed by namespaced key. The
//! owner may re-acquire (idempotent re-write); a foreign writer polls
//! until the wait budget elapses, then fails with `memory_lock_timeout`.
//! Locks end on explicit release (read-with-confirmation) or TTL expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::repos::MemoryError;

/// Default wait budget for a contended write.
pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default lock lifetime when never explicitly released.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Poll interval while waiting on a foreign lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct HeldLock {
    owner_task_id: String,
    expires_at: Instant,
}

/// Write-lock table keyed by namespaced memory key.
#[derive(Debug)]
pub struct WriteLockTable {
    locks: Mutex<HashMap<String, HeldLock>>,
    wait_timeout: Duration,
    ttl: Duration,
}

impl Default for WriteLockTable {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_WAIT_TIMEOUT, DEFAULT_LOCK_TTL)
    }
}

impl WriteLockTable {
    /// Create a table with explicit wait and TTL budgets.
    pub fn new(wait_timeout: Duration, ttl: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            wait_timeout,
            ttl,
        }
    }

    /// Acquire (or re-acquire) the lock for `namespaced_key`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::LockTimeout`] when a different owner holds the lock
    /// past the wait budget.
    pub async fn acquire(&self, namespaced_key: &str, owner_task_id: &str) -> Result<(), MemoryError> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            {
                let mut locks = self.locks.lock().await;
                let now = Instant::now();
                let expired = locks
                    .get(namespaced_key)
                    .map(|held| held.expires_at <= now)
                    .unwrap_or(false);
                if expired {
                    locks.remove(namespaced_key);
                }

                let reentrant = match locks.get(namespaced_key) {
                    None => true,
                    Some(held) => held.owner_task_id == owner_task_id,
                };
                if reentrant {
                    locks.insert(
                        namespaced_key.to_owned(),
                        HeldLock {
                            owner_task_id: owner_task_id.to_owned(),
                            expires_at: now + self.ttl,
                        },
                    );
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(MemoryError::LockTimeout);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    /// Release the lock for `namespaced_key`, if held.
    pub async fn release(&self, namespaced_key: &str) {
        self.locks.lock().await.remove(namespaced_key);
    }

    /// Whether any unexpired lock is held for `namespaced_key`.
    pub async fn is_held(&self, namespaced_key: &str) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(namespaced_key)
            .map(|held| held.expires_at > Instant::now())
            .unwrap_or(false)
    }
}
