use std::time::Duration;

/// Settings of one cache member. Deserialized from the `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub num_owners: usize,
    pub num_segments: usize,
    /// Replicate writes synchronously unless a command forces otherwise.
    pub sync_replication: bool,
    pub remote_timeout_ms: u64,
    pub lock_acquisition_timeout_ms: u64,
    pub statistics_enabled: bool,
    pub partition_handling_enabled: bool,
    pub expiry_reaper_interval_ms: u64,
    /// Deliver prepares in one global order on every owner.
    pub total_order_transactions: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            num_owners: 2,
            num_segments: 64,
            sync_replication: true,
            remote_timeout_ms: 5_000,
            lock_acquisition_timeout_ms: 2_000,
            statistics_enabled: true,
            partition_handling_enabled: true,
            expiry_reaper_interval_ms: 1_000,
            total_order_transactions: false,
        }
    }
}

impl CacheConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn lock_acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquisition_timeout_ms)
    }

    pub fn expiry_reaper_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_reaper_interval_ms)
    }

    pub fn with_num_owners(mut self, num_owners: usize) -> Self {
        self.num_owners = num_owners;
        self
    }

    pub fn with_num_segments(mut self, num_segments: usize) -> Self {
        self.num_segments = num_segments;
        self
    }

    pub fn with_sync_replication(mut self, sync: bool) -> Self {
        self.sync_replication = sync;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_lock_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquisition_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    pub fn with_partition_handling(mut self, enabled: bool) -> Self {
        self.partition_handling_enabled = enabled;
        self
    }

    pub fn with_total_order_transactions(mut self, enabled: bool) -> Self {
        self.total_order_transactions = enabled;
        self
    }
}
