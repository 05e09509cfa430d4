use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use shoal_types::{Key, Metadata, ShoalError, Value};

use crate::traits::DataContainer;
use crate::types::{expiry_for, now_ns, StoredEntry};

/// In-memory `DataContainer` backed by a `BTreeMap`.
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct MemDataContainer {
    inner: Arc<RwLock<BTreeMap<Key, StoredEntry>>>,
}

impl MemDataContainer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataContainer for MemDataContainer {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, ShoalError> {
        let now = now_ns();
        let g = self.inner.read().await;
        Ok(g.get(key).filter(|e| !e.is_expired(now)).cloned())
    }

    async fn put(&self, key: Key, value: Value, metadata: Metadata) -> Result<(), ShoalError> {
        let now = now_ns();
        let mut g = self.inner.write().await;
        let created_at_ns = g
            .get(&key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.created_at_ns)
            .unwrap_or(now);
        let entry = StoredEntry {
            key: key.clone(),
            value,
            metadata,
            created_at_ns,
            modified_at_ns: now,
            expires_at_ns: expiry_for(&metadata, now),
        };
        g.insert(key, entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<StoredEntry>, ShoalError> {
        Ok(self.inner.write().await.remove(key))
    }

    async fn entries(&self) -> Result<Vec<StoredEntry>, ShoalError> {
        let now = now_ns();
        let g = self.inner.read().await;
        Ok(g.values().filter(|e| !e.is_expired(now)).cloned().collect())
    }

    async fn clear(&self) -> Result<usize, ShoalError> {
        let mut g = self.inner.write().await;
        let n = g.len();
        g.clear();
        Ok(n)
    }

    async fn len(&self) -> Result<usize, ShoalError> {
        let now = now_ns();
        Ok(self.inner.read().await.values().filter(|e| !e.is_expired(now)).count())
    }

    async fn purge_expired(&self, now_ns: i64) -> Result<usize, ShoalError> {
        let mut g = self.inner.write().await;
        let before = g.len();
        g.retain(|_, e| !e.is_expired(now_ns));
        Ok(before - g.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_and_get() {
        let c = MemDataContainer::new();
        c.put("k".into(), b"v".to_vec(), Metadata::default()).await.unwrap();
        let e = c.get("k").await.unwrap().unwrap();
        assert_eq!(e.value, b"v");
        assert_eq!(e.expires_at_ns, None);
        assert!(c.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_keeps_creation_time() {
        let c = MemDataContainer::new();
        c.put("k".into(), b"1".to_vec(), Metadata::default()).await.unwrap();
        let first = c.get("k").await.unwrap().unwrap();
        c.put("k".into(), b"2".to_vec(), Metadata::default()).await.unwrap();
        let second = c.get("k").await.unwrap().unwrap();
        assert_eq!(second.value, b"2");
        assert_eq!(second.created_at_ns, first.created_at_ns);
        assert!(second.modified_at_ns >= first.modified_at_ns);
    }

    #[tokio::test]
    async fn expired_entries_are_hidden_and_purged() {
        let c = MemDataContainer::new();
        c.put("gone".into(), b"x".to_vec(), Metadata::default().with_lifespan_ms(0))
            .await
            .unwrap();
        c.put("kept".into(), b"y".to_vec(), Metadata::default().with_lifespan_ms(60_000))
            .await
            .unwrap();
        assert!(c.get("gone").await.unwrap().is_none());
        assert_eq!(c.len().await.unwrap(), 1);

        let purged = c.purge_expired(now_ns()).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(c.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let c = MemDataContainer::new();
        c.put("a".into(), b"1".to_vec(), Metadata::default()).await.unwrap();
        c.put("b".into(), b"2".to_vec(), Metadata::default()).await.unwrap();
        let removed = c.remove("a").await.unwrap().unwrap();
        assert_eq!(removed.value, b"1");
        assert!(c.remove("a").await.unwrap().is_none());
        assert_eq!(c.clear().await.unwrap(), 1);
        assert_eq!(c.len().await.unwrap(), 0);
    }
}
