use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use shoal_types::{Address, AvailabilityMode, ShoalError};

use crate::topology::OwnershipOracle;

/// Availability mode paired with the view it was computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilitySnapshot {
    pub mode: AvailabilityMode,
    pub members: BTreeSet<Address>,
    pub view_id: u64,
}

/// Decides per key whether a read or write may proceed.
///
/// The {mode, view} pair is replaced as one `Arc`, so a check never mixes a
/// mode from one view with the members of another.
pub struct PartitionHandlingManager {
    oracle: Arc<dyn OwnershipOracle>,
    snapshot: RwLock<Arc<AvailabilitySnapshot>>,
}

impl PartitionHandlingManager {
    pub fn new(oracle: Arc<dyn OwnershipOracle>, initial_view: impl IntoIterator<Item = Address>) -> Self {
        PartitionHandlingManager {
            oracle,
            snapshot: RwLock::new(Arc::new(AvailabilitySnapshot {
                mode: AvailabilityMode::Available,
                members: initial_view.into_iter().collect(),
                view_id: 0,
            })),
        }
    }

    pub fn availability(&self) -> Arc<AvailabilitySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn availability_mode(&self) -> AvailabilityMode {
        self.availability().mode
    }

    pub fn set_availability(&self, mode: AvailabilityMode, members: impl IntoIterator<Item = Address>) {
        let members: BTreeSet<Address> = members.into_iter().collect();
        let mut g = self.snapshot.write();
        let previous = g.mode;
        let next = Arc::new(AvailabilitySnapshot { mode, members, view_id: g.view_id + 1 });
        *g = Arc::clone(&next);
        drop(g);

        if previous != mode {
            match mode {
                AvailabilityMode::Degraded => {
                    tracing::warn!(view_id = next.view_id, members = ?next.members, "cache entering degraded mode")
                }
                AvailabilityMode::Available => {
                    tracing::info!(view_id = next.view_id, members = ?next.members, "cache available again")
                }
            }
        } else {
            tracing::debug!(view_id = next.view_id, %mode, "availability view updated");
        }
    }

    /// Fails iff the cache is degraded and some owner of `key` is outside the view.
    pub fn check_write(&self, key: &str) -> Result<(), ShoalError> {
        let snap = self.availability();
        if snap.mode == AvailabilityMode::Available {
            return Ok(());
        }
        let owners = self.oracle.owners(key);
        if owners.iter().all(|o| snap.members.contains(o)) {
            Ok(())
        } else {
            tracing::debug!(%key, ?owners, "write rejected: owners outside view");
            Err(ShoalError::key_unavailable(&key.to_string()))
        }
    }

    /// Runs after the read. A found value is judged like a write; an absent one
    /// fails only when no owner is among `live_members`.
    pub fn check_read(&self, key: &str, found: bool, live_members: &[Address]) -> Result<(), ShoalError> {
        if found {
            return self.check_write(key);
        }
        let owners = self.oracle.owners(key);
        if owners.iter().any(|o| live_members.contains(o)) {
            Ok(())
        } else {
            tracing::debug!(%key, ?owners, "absent read rejected: no owner is live");
            Err(ShoalError::key_unavailable(&key.to_string()))
        }
    }

    pub fn check_clear(&self) -> Result<(), ShoalError> {
        match self.availability_mode() {
            AvailabilityMode::Available => Ok(()),
            AvailabilityMode::Degraded => Err(ShoalError::ClusterUnavailable),
        }
    }
}
