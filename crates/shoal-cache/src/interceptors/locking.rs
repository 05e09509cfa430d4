use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use shoal_commands::{Command, CommandResult, InvocationContext};
use shoal_types::{Flag, Key, ShoalError};

use crate::interceptor::{Interceptor, Next};

// ---------------------------------------------------------------------------
// LockManager
// ---------------------------------------------------------------------------

/// Per-key async mutexes, created on demand and dropped once unused.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

/// Holds the locks of one acquisition; releases them on drop.
pub struct LockGuard {
    manager: Arc<LockManager>,
    keys: Vec<Key>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl LockManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slot(&self, key: &Key) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(key.clone()).or_default())
    }

    /// Lock `keys` in sorted order. A zero timeout means try once.
    pub async fn acquire(self: &Arc<Self>, keys: &[Key], timeout: Duration) -> Result<LockGuard, ShoalError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guard = LockGuard { manager: Arc::clone(self), keys: sorted.clone(), guards: Vec::new() };
        for key in &sorted {
            let slot = self.slot(key);
            let acquired = if timeout.is_zero() {
                slot.try_lock_owned().ok()
            } else {
                tokio::time::timeout(timeout, slot.lock_owned()).await.ok()
            };
            match acquired {
                Some(g) => guard.guards.push(g),
                None => {
                    tracing::debug!(%key, ?timeout, "lock acquisition timed out");
                    return Err(ShoalError::LockTimeout(key.clone()));
                }
            }
        }
        Ok(guard)
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .get(key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys with a live lock slot.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.guards.clear();
        let mut locks = self.manager.locks.lock();
        for key in &self.keys {
            if locks.get(key).map(|m| Arc::strong_count(m) == 1).unwrap_or(false) {
                locks.remove(key);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LockingInterceptor
// ---------------------------------------------------------------------------

/// Locks the keys a write touches for the rest of the invocation.
///
/// Backup writes arriving from the primary owner (`CacheModeLocal` with a
/// remote origin) are not locked again.
pub struct LockingInterceptor {
    locks: Arc<LockManager>,
    timeout: Duration,
}

impl LockingInterceptor {
    pub fn new(locks: Arc<LockManager>, timeout: Duration) -> Self {
        LockingInterceptor { locks, timeout }
    }

    fn keys_to_lock(&self, ctx: &InvocationContext, cmd: &Command) -> Vec<Key> {
        if cmd.has_flag(Flag::SkipLocking) || (cmd.has_flag(Flag::CacheModeLocal) && !ctx.is_origin_local()) {
            return Vec::new();
        }
        match cmd {
            Command::Put(_) | Command::Remove(_) | Command::Replace(_) | Command::PutMap(_) | Command::Prepare(_) => {
                cmd.affected_keys()
            }
            Command::Get(_)
            | Command::ClusteredGet(_)
            | Command::Clear(_)
            | Command::Commit(_)
            | Command::Rollback(_)
            | Command::TxCompletion(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl Interceptor for LockingInterceptor {
    fn name(&self) -> &'static str {
        "locking"
    }

    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        let keys = self.keys_to_lock(ctx, cmd);
        if keys.is_empty() {
            return next.invoke(ctx, cmd).await;
        }
        let timeout = if cmd.has_flag(Flag::ZeroLockAcquisitionTimeout) {
            Duration::ZERO
        } else {
            self.timeout
        };
        let _held = self.locks.acquire(&keys, timeout).await?;
        next.invoke(ctx, cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    #[tokio::test]
    async fn guard_releases_and_cleans_up() {
        let lm = LockManager::new();
        let g = lm.acquire(&["b".into(), "a".into()], Duration::from_millis(10)).await.unwrap();
        assert!(lm.is_locked("a"));
        assert_eq!(lm.len(), 2);
        drop(g);
        assert!(!lm.is_locked("a"));
        assert!(lm.is_empty());
    }

    #[tokio::test]
    async fn contended_key_times_out() {
        let lm = LockManager::new();
        let _g = lm.acquire(&["k".into()], Duration::from_millis(10)).await.unwrap();
        let err = lm.acquire(&["k".into()], Duration::from_millis(20)).await.err().unwrap();
        assert_eq!(err, ShoalError::LockTimeout("k".into()));
        let err = lm.acquire(&["k".into()], Duration::ZERO).await.err().unwrap();
        assert_eq!(err, ShoalError::LockTimeout("k".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_key_sets_do_not_deadlock() {
        let lm = LockManager::new();
        let keys: Vec<Key> = (0..6).map(|i| format!("k{i}")).collect();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let lm = lm.clone();
            let mut mine = keys.clone();
            mine.shuffle(&mut rand::thread_rng());
            mine.truncate(3);
            tasks.push(tokio::spawn(async move {
                let _g = lm.acquire(&mine, Duration::from_secs(5)).await.unwrap();
                tokio::task::yield_now().await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(lm.is_empty());
    }
}
