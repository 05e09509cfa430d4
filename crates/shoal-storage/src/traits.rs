use std::future::Future;

use shoal_types::{Key, Metadata, ShoalError, Value};

use crate::types::StoredEntry;

/// Committed key/value store of a single member.
///
/// Methods use RPITIT (`-> impl Future + Send`) so interceptors generic over
/// the container can `.await` across thread boundaries without boxing.
pub trait DataContainer: Send + Sync + 'static {
    /// Return the live entry for `key`. Expired entries are reported as absent
    /// even before the reaper has purged them.
    fn get(&self, key: &str)
        -> impl Future<Output = Result<Option<StoredEntry>, ShoalError>> + Send;

    /// Insert or overwrite `key`. The creation timestamp of an existing entry
    /// is preserved.
    fn put(&self, key: Key, value: Value, metadata: Metadata)
        -> impl Future<Output = Result<(), ShoalError>> + Send;

    /// Remove `key`, returning the entry that was committed (expired or not).
    fn remove(&self, key: &str)
        -> impl Future<Output = Result<Option<StoredEntry>, ShoalError>> + Send;

    /// Snapshot of all live entries in key order.
    fn entries(&self) -> impl Future<Output = Result<Vec<StoredEntry>, ShoalError>> + Send;

    /// Drop everything; returns how many entries were removed.
    fn clear(&self) -> impl Future<Output = Result<usize, ShoalError>> + Send;

    /// Number of live entries.
    fn len(&self) -> impl Future<Output = Result<usize, ShoalError>> + Send;

    /// Remove every entry whose expiry is at or before `now_ns`.
    fn purge_expired(&self, now_ns: i64)
        -> impl Future<Output = Result<usize, ShoalError>> + Send;
}
