pub mod availability;
pub mod hash;
pub mod manager;
pub mod topology;

pub use availability::AvailabilityStrategy;
pub use hash::ConsistentHash;
pub use manager::{AvailabilitySnapshot, PartitionHandlingManager};
pub use topology::{CacheTopology, OwnershipOracle, TopologyManager};
