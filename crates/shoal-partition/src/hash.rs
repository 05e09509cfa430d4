use std::collections::BTreeSet;

use xxhash_rust::xxh3::xxh3_64;

use shoal_types::Address;

/// Segment-based consistent hash.
///
/// Keys map to one of `num_segments` segments; each segment is owned by up to
/// `num_owners` members picked by rendezvous (highest weight) hashing, so a
/// membership change only moves the segments whose winners changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistentHash {
    members: Vec<Address>,
    num_owners: usize,
    segment_owners: Vec<Vec<Address>>,
}

impl ConsistentHash {
    pub fn new(members: &[Address], num_owners: usize, num_segments: usize) -> Self {
        let members: Vec<Address> = members.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let num_segments = num_segments.max(1);
        let segment_owners = (0..num_segments)
            .map(|segment| rank(&members, segment, num_owners))
            .collect();
        ConsistentHash { members, num_owners, segment_owners }
    }

    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    pub fn num_segments(&self) -> usize {
        self.segment_owners.len()
    }

    pub fn segment_for(&self, key: &str) -> usize {
        (xxh3_64(key.as_bytes()) % self.segment_owners.len() as u64) as usize
    }

    pub fn segment_owners(&self, segment: usize) -> &[Address] {
        self.segment_owners.get(segment).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Owners of `key`, primary first.
    pub fn locate_owners(&self, key: &str) -> &[Address] {
        self.segment_owners(self.segment_for(key))
    }

    pub fn primary_owner(&self, key: &str) -> Option<&Address> {
        self.locate_owners(key).first()
    }

    pub fn is_owner(&self, member: &Address, key: &str) -> bool {
        self.locate_owners(key).contains(member)
    }

    /// True when every segment keeps at least one owner inside `view`.
    pub fn every_segment_has_owner_in(&self, view: &BTreeSet<Address>) -> bool {
        self.segment_owners
            .iter()
            .all(|owners| owners.iter().any(|o| view.contains(o)))
    }
}

fn rank(members: &[Address], segment: usize, num_owners: usize) -> Vec<Address> {
    let mut weighted: Vec<(u64, &Address)> = members
        .iter()
        .map(|m| (xxh3_64(format!("{segment}:{m}").as_bytes()), m))
        .collect();
    weighted.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    weighted.into_iter().take(num_owners).map(|(_, m)| m.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(names: &[&str]) -> Vec<Address> {
        names.iter().map(|n| Address::new(*n)).collect()
    }

    #[test]
    fn owners_are_distinct_and_bounded() {
        let ch = ConsistentHash::new(&members(&["a", "b", "c"]), 2, 32);
        for i in 0..100 {
            let owners = ch.locate_owners(&format!("key-{i}"));
            assert_eq!(owners.len(), 2);
            assert_ne!(owners[0], owners[1]);
        }
    }

    #[test]
    fn fewer_members_than_owners() {
        let ch = ConsistentHash::new(&members(&["solo"]), 3, 8);
        assert_eq!(ch.locate_owners("k"), &[Address::new("solo")][..]);
        assert_eq!(ch.primary_owner("k"), Some(&Address::new("solo")));
    }

    #[test]
    fn empty_membership_has_no_owners() {
        let ch = ConsistentHash::new(&[], 2, 8);
        assert!(ch.locate_owners("k").is_empty());
        assert!(ch.primary_owner("k").is_none());
    }

    #[test]
    fn losing_a_member_only_moves_its_segments() {
        let before = ConsistentHash::new(&members(&["a", "b", "c", "d"]), 1, 64);
        let after = ConsistentHash::new(&members(&["a", "b", "c"]), 1, 64);
        for s in 0..64 {
            if before.segment_owners(s)[0] != Address::new("d") {
                assert_eq!(before.segment_owners(s), after.segment_owners(s));
            }
        }
    }

    #[test]
    fn duplicate_members_are_collapsed() {
        let ch = ConsistentHash::new(&members(&["b", "a", "b"]), 2, 4);
        assert_eq!(ch.members(), &members(&["a", "b"])[..]);
    }
}
