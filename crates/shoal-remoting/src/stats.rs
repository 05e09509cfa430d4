use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Remote-call statistics tracked for transaction-critical commands.
///
/// Durations are in microseconds; `NumNodes*` accumulate recipient counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatKind {
    RttPrepare,
    NumRttsPrepare,
    AsyncPrepare,
    NumAsyncPrepare,
    NumNodesPrepare,
    RttCommit,
    NumRttsCommit,
    AsyncCommit,
    NumAsyncCommit,
    NumNodesCommit,
    RttRollback,
    NumRttsRollback,
    AsyncRollback,
    NumAsyncRollback,
    NumNodesRollback,
    AsyncCompleteNotify,
    NumAsyncCompleteNotify,
    RttGet,
    NumRttsGet,
    NumNodesGet,
}

impl StatKind {
    pub const ALL: [StatKind; 20] = [
        StatKind::RttPrepare,
        StatKind::NumRttsPrepare,
        StatKind::AsyncPrepare,
        StatKind::NumAsyncPrepare,
        StatKind::NumNodesPrepare,
        StatKind::RttCommit,
        StatKind::NumRttsCommit,
        StatKind::AsyncCommit,
        StatKind::NumAsyncCommit,
        StatKind::NumNodesCommit,
        StatKind::RttRollback,
        StatKind::NumRttsRollback,
        StatKind::AsyncRollback,
        StatKind::NumAsyncRollback,
        StatKind::NumNodesRollback,
        StatKind::AsyncCompleteNotify,
        StatKind::NumAsyncCompleteNotify,
        StatKind::RttGet,
        StatKind::NumRttsGet,
        StatKind::NumNodesGet,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StatKind::RttPrepare => "rtt_prepare",
            StatKind::NumRttsPrepare => "num_rtts_prepare",
            StatKind::AsyncPrepare => "async_prepare",
            StatKind::NumAsyncPrepare => "num_async_prepare",
            StatKind::NumNodesPrepare => "num_nodes_prepare",
            StatKind::RttCommit => "rtt_commit",
            StatKind::NumRttsCommit => "num_rtts_commit",
            StatKind::AsyncCommit => "async_commit",
            StatKind::NumAsyncCommit => "num_async_commit",
            StatKind::NumNodesCommit => "num_nodes_commit",
            StatKind::RttRollback => "rtt_rollback",
            StatKind::NumRttsRollback => "num_rtts_rollback",
            StatKind::AsyncRollback => "async_rollback",
            StatKind::NumAsyncRollback => "num_async_rollback",
            StatKind::NumNodesRollback => "num_nodes_rollback",
            StatKind::AsyncCompleteNotify => "async_complete_notify",
            StatKind::NumAsyncCompleteNotify => "num_async_complete_notify",
            StatKind::RttGet => "rtt_get",
            StatKind::NumRttsGet => "num_rtts_get",
            StatKind::NumNodesGet => "num_nodes_get",
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fire-and-forget accumulation target. Must never block.
pub trait StatisticsSink: Send + Sync {
    fn add_value(&self, kind: StatKind, value: u64);

    fn increment(&self, kind: StatKind) {
        self.add_value(kind, 1);
    }
}

/// Lock-free accumulators, one per `StatKind`.
#[derive(Debug, Default)]
pub struct AtomicStatistics {
    values: [AtomicU64; 20],
}

impl AtomicStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: StatKind) -> u64 {
        self.values[kind.index()].load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for v in &self.values {
            v.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        StatKind::ALL.iter().map(|k| (k.name(), self.get(*k))).collect()
    }
}

impl StatisticsSink for AtomicStatistics {
    fn add_value(&self, kind: StatKind, value: u64) {
        self.values[kind.index()].fetch_add(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_resets() {
        let s = AtomicStatistics::new();
        s.add_value(StatKind::RttGet, 40);
        s.add_value(StatKind::RttGet, 2);
        s.increment(StatKind::NumRttsGet);
        assert_eq!(s.get(StatKind::RttGet), 42);
        assert_eq!(s.snapshot()["num_rtts_get"], 1);
        s.reset();
        assert!(s.snapshot().values().all(|v| *v == 0));
    }

    #[test]
    fn every_kind_has_its_own_slot() {
        for (i, k) in StatKind::ALL.iter().enumerate() {
            assert_eq!(k.index(), i);
        }
    }
}
