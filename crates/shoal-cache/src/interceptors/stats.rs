use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use shoal_commands::{Command, CommandResult, InvocationContext};
use shoal_types::{Flag, ShoalError};

use crate::interceptor::{Interceptor, Next};

/// Hit/miss/store/remove counters of one member, with cumulative timings in
/// microseconds.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    removes: AtomicU64,
    remove_misses: AtomicU64,
    read_time_us: AtomicU64,
    write_time_us: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub removes: u64,
    pub remove_misses: u64,
    pub read_time_us: u64,
    pub write_time_us: u64,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            remove_misses: self.remove_misses.load(Ordering::Relaxed),
            read_time_us: self.read_time_us.load(Ordering::Relaxed),
            write_time_us: self.write_time_us.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.hits,
            &self.misses,
            &self.stores,
            &self.removes,
            &self.remove_misses,
            &self.read_time_us,
            &self.write_time_us,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Records cache-level statistics for operations issued on this member.
pub struct CacheMgmtInterceptor {
    stats: Arc<CacheStatistics>,
}

impl CacheMgmtInterceptor {
    pub fn new(stats: Arc<CacheStatistics>) -> Self {
        CacheMgmtInterceptor { stats }
    }
}

#[async_trait]
impl Interceptor for CacheMgmtInterceptor {
    fn name(&self) -> &'static str {
        "cache-mgmt"
    }

    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        if !ctx.is_origin_local() || cmd.has_flag(Flag::SkipStatistics) {
            return next.invoke(ctx, cmd).await;
        }
        let started = Instant::now();
        let result = next.invoke(ctx, cmd).await?;
        let micros = started.elapsed().as_micros() as u64;
        let s = &self.stats;

        match cmd {
            Command::Get(_) | Command::ClusteredGet(_) => {
                CacheStatistics::add(&s.read_time_us, micros);
                if result.value.is_some() {
                    CacheStatistics::add(&s.hits, 1);
                } else {
                    CacheStatistics::add(&s.misses, 1);
                }
            }
            Command::Put(_) | Command::Replace(_) => {
                CacheStatistics::add(&s.write_time_us, micros);
                if result.successful {
                    CacheStatistics::add(&s.stores, 1);
                }
            }
            Command::PutMap(c) => {
                CacheStatistics::add(&s.write_time_us, micros);
                CacheStatistics::add(&s.stores, c.map.len() as u64);
            }
            Command::Remove(_) => {
                CacheStatistics::add(&s.write_time_us, micros);
                if result.successful {
                    CacheStatistics::add(&s.removes, 1);
                } else {
                    CacheStatistics::add(&s.remove_misses, 1);
                }
            }
            Command::Clear(_)
            | Command::Prepare(_)
            | Command::Commit(_)
            | Command::Rollback(_)
            | Command::TxCompletion(_) => {}
        }
        Ok(result)
    }
}
