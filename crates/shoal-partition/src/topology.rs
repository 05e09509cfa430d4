use std::sync::Arc;

use parking_lot::RwLock;

use shoal_types::Address;

use crate::hash::ConsistentHash;

/// Maps a key to the ordered set of members that own it.
pub trait OwnershipOracle: Send + Sync {
    fn owners(&self, key: &str) -> Vec<Address>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTopology {
    pub topology_id: u64,
    pub ch: ConsistentHash,
}

/// Holds the installed topology; readers get a consistent `Arc` snapshot.
pub struct TopologyManager {
    current: RwLock<Arc<CacheTopology>>,
    num_owners: usize,
    num_segments: usize,
}

impl TopologyManager {
    pub fn new(members: &[Address], num_owners: usize, num_segments: usize) -> Self {
        let ch = ConsistentHash::new(members, num_owners, num_segments);
        TopologyManager {
            current: RwLock::new(Arc::new(CacheTopology { topology_id: 1, ch })),
            num_owners,
            num_segments,
        }
    }

    pub fn current(&self) -> Arc<CacheTopology> {
        Arc::clone(&self.current.read())
    }

    pub fn members(&self) -> Vec<Address> {
        self.current().ch.members().to_vec()
    }

    /// Install a consistent hash computed over `members`. Data is not moved.
    pub fn rebalance(&self, members: &[Address]) -> Arc<CacheTopology> {
        let ch = ConsistentHash::new(members, self.num_owners, self.num_segments);
        let mut g = self.current.write();
        let next = Arc::new(CacheTopology { topology_id: g.topology_id + 1, ch });
        *g = Arc::clone(&next);
        drop(g);
        tracing::info!(topology_id = next.topology_id, members = ?next.ch.members(), "topology rebalanced");
        next
    }
}

impl OwnershipOracle for TopologyManager {
    fn owners(&self, key: &str) -> Vec<Address> {
        self.current().ch.locate_owners(key).to_vec()
    }
}
