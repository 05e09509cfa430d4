use std::collections::BTreeSet;
use std::sync::Arc;

use shoal_types::{Address, AvailabilityMode, ViewListener};

use crate::manager::PartitionHandlingManager;
use crate::topology::TopologyManager;

/// Turns membership views into availability decisions and rebalances.
///
/// With `S` the members of the installed topology and `V` the new view:
/// - nothing lost: stay available, rebalance if members joined;
/// - members lost but `V` holds a strict majority of `S` and every segment
///   still has an owner in `V`: rebalance onto `V` and stay available;
/// - otherwise: degraded with view `V`, topology untouched.
///
/// A degraded cache whose view again covers `S` becomes available.
pub struct AvailabilityStrategy {
    local: Address,
    manager: Arc<PartitionHandlingManager>,
    topology: Arc<TopologyManager>,
}

impl AvailabilityStrategy {
    pub fn new(local: Address, manager: Arc<PartitionHandlingManager>, topology: Arc<TopologyManager>) -> Self {
        AvailabilityStrategy { local, manager, topology }
    }

    pub fn on_view(&self, view: &[Address]) {
        let v: BTreeSet<Address> = view.iter().cloned().collect();
        let current = self.topology.current();
        let s: BTreeSet<Address> = current.ch.members().iter().cloned().collect();
        let lost: Vec<Address> = s.difference(&v).cloned().collect();
        let joined = v.difference(&s).next().is_some();
        let mode = self.manager.availability_mode();

        tracing::debug!(
            member = %self.local,
            view = ?v,
            lost = lost.len(),
            joined,
            %mode,
            "membership view received"
        );

        match mode {
            AvailabilityMode::Degraded => {
                if lost.is_empty() {
                    if joined {
                        self.topology.rebalance(view);
                    }
                    self.manager.set_availability(AvailabilityMode::Available, v);
                } else {
                    self.manager.set_availability(AvailabilityMode::Degraded, v);
                }
            }
            AvailabilityMode::Available => {
                if lost.is_empty() {
                    if joined {
                        self.topology.rebalance(view);
                    }
                    self.manager.set_availability(AvailabilityMode::Available, v);
                    return;
                }
                let survivors = s.intersection(&v).count();
                let majority = survivors * 2 > s.len();
                if majority && current.ch.every_segment_has_owner_in(&v) {
                    self.topology.rebalance(view);
                    self.manager.set_availability(AvailabilityMode::Available, v);
                } else {
                    tracing::warn!(member = %self.local, ?lost, "lost owners without a safe majority");
                    self.manager.set_availability(AvailabilityMode::Degraded, v);
                }
            }
        }
    }
}

impl ViewListener for AvailabilityStrategy {
    fn view_changed(&self, view: &[Address]) {
        self.on_view(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(s: &str) -> Address {
        Address::new(s)
    }

    fn setup(local: &str, members: &[Address], num_owners: usize) -> (AvailabilityStrategy, Arc<PartitionHandlingManager>, Arc<TopologyManager>) {
        let topology = Arc::new(TopologyManager::new(members, num_owners, 32));
        let manager = Arc::new(PartitionHandlingManager::new(topology.clone(), members.to_vec()));
        (AvailabilityStrategy::new(a(local), manager.clone(), topology.clone()), manager, topology)
    }

    #[test]
    fn minority_side_degrades_and_keeps_topology() {
        let abc = [a("A"), a("B"), a("C")];
        let (strategy, manager, topology) = setup("A", &abc, 2);
        strategy.on_view(&[a("A")]);
        assert_eq!(manager.availability_mode(), AvailabilityMode::Degraded);
        assert_eq!(topology.current().topology_id, 1);
        assert_eq!(manager.availability().members, BTreeSet::from([a("A")]));
    }

    #[test]
    fn majority_side_rebalances_and_stays_available() {
        let abc = [a("A"), a("B"), a("C")];
        let (strategy, manager, topology) = setup("B", &abc, 2);
        strategy.on_view(&[a("B"), a("C")]);
        assert_eq!(manager.availability_mode(), AvailabilityMode::Available);
        assert_eq!(topology.members(), vec![a("B"), a("C")]);
        assert!(manager.check_write("anything").is_ok());
    }

    #[test]
    fn majority_without_full_segment_coverage_degrades() {
        let abc = [a("A"), a("B"), a("C")];
        // One owner per segment: losing A loses A's segments.
        let (strategy, manager, topology) = setup("B", &abc, 1);
        let a_owns_something = (0..32).any(|s| topology.current().ch.segment_owners(s) == [a("A")]);
        assert!(a_owns_something);
        strategy.on_view(&[a("B"), a("C")]);
        assert_eq!(manager.availability_mode(), AvailabilityMode::Degraded);
    }

    #[test]
    fn heal_restores_availability() {
        let abc = [a("A"), a("B"), a("C")];
        let (strategy, manager, _) = setup("A", &abc, 2);
        strategy.on_view(&[a("A")]);
        strategy.on_view(&[a("A"), a("B")]);
        assert_eq!(manager.availability_mode(), AvailabilityMode::Degraded);
        strategy.on_view(&abc);
        assert_eq!(manager.availability_mode(), AvailabilityMode::Available);
    }

    #[test]
    fn joiner_triggers_rebalance() {
        let ab = [a("A"), a("B")];
        let (strategy, manager, topology) = setup("A", &ab, 2);
        strategy.on_view(&[a("A"), a("B"), a("C")]);
        assert_eq!(topology.current().topology_id, 2);
        assert_eq!(topology.members().len(), 3);
        assert_eq!(manager.availability_mode(), AvailabilityMode::Available);
    }
}
