use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::traits::DataContainer;
use crate::types::now_ns;

/// Periodically purges expired entries from a container.
///
/// Reads already hide expired entries; the reaper only reclaims memory.
pub struct ExpiryReaper<C> {
    container: Arc<C>,
    interval: Duration,
}

impl<C: DataContainer> ExpiryReaper<C> {
    pub fn new(container: Arc<C>, interval: Duration) -> Self {
        ExpiryReaper { container, interval }
    }

    /// Run one purge pass and return the number of reclaimed entries.
    pub async fn reap_once(&self) -> usize {
        match self.container.purge_expired(now_ns()).await {
            Ok(n) => {
                if n > 0 {
                    tracing::debug!(purged = n, "expired entries reclaimed");
                }
                n
            }
            Err(e) => {
                tracing::warn!(error = %e, "expiry purge failed");
                0
            }
        }
    }

    /// Loop until the task is aborted.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.reap_once().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemDataContainer;
    use shoal_types::Metadata;

    #[tokio::test]
    async fn reaper_reclaims_expired_entries() {
        let c = Arc::new(MemDataContainer::new());
        c.put("k".into(), b"v".to_vec(), Metadata::default().with_lifespan_ms(0))
            .await
            .unwrap();
        let reaper = ExpiryReaper::new(c.clone(), Duration::from_millis(10));
        assert_eq!(reaper.reap_once().await, 1);
        assert_eq!(reaper.reap_once().await, 0);
    }

    #[tokio::test]
    async fn spawned_reaper_runs_until_aborted() {
        let c = Arc::new(MemDataContainer::new());
        c.put("k".into(), b"v".to_vec(), Metadata::default().with_lifespan_ms(0))
            .await
            .unwrap();
        let handle = ExpiryReaper::new(c.clone(), Duration::from_millis(5)).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert!(c.remove("k").await.unwrap().is_none());
    }
}
