// src/core/membership/ring.rs

//! Implements the consistent-hash ring used to arbitrate shard and
//! replication-processor ownership across hosts.
//!
//! Each member is projected onto the ring at a fixed number of virtual
//! points. A key is owned by the member at the first ring point clockwise
//! from the key's hash. Brief ownership overlap during reconfiguration is
//! tolerated by the callers: shard writes are fenced by RangeID CAS and
//! replication applies are version-guarded.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Cursor;
use tokio::sync::watch;

/// The number of virtual points each member occupies on the ring.
const VIRTUAL_POINTS_PER_MEMBER: usize = 128;

fn ring_hash(key: &str) -> u32 {
    // murmur3 over an in-memory cursor cannot fail.
    murmur3::murmur3_32(&mut Cursor::new(key.as_bytes()), 0).unwrap_or_default()
}

#[derive(Debug, Default)]
struct RingState {
    points: BTreeMap<u32, String>,
    members: Vec<String>,
}

/// A consistent-hash ring over the current host membership, with a watch
/// channel that bumps an epoch on every membership change.
#[derive(Debug)]
pub struct MembershipRing {
    state: RwLock<RingState>,
    epoch_tx: watch::Sender<u64>,
}

impl MembershipRing {
    pub fn new(members: Vec<String>) -> Self {
        let (epoch_tx, _) = watch::channel(0);
        let ring = Self {
            state: RwLock::new(RingState::default()),
            epoch_tx,
        };
        ring.set_members(members);
        ring
    }

    /// Replaces the full member set and notifies subscribers.
    pub fn set_members(&self, mut members: Vec<String>) {
        members.sort();
        members.dedup();
        let mut points = BTreeMap::new();
        for member in &members {
            for i in 0..VIRTUAL_POINTS_PER_MEMBER {
                points.insert(ring_hash(&format!("{member}#{i}")), member.clone());
            }
        }
        {
            let mut state = self.state.write();
            state.points = points;
            state.members = members;
        }
        self.epoch_tx.send_modify(|epoch| *epoch += 1);
    }

    pub fn members(&self) -> Vec<String> {
        self.state.read().members.clone()
    }

    /// Returns the member owning `key`, or `None` when the ring is empty.
    pub fn lookup(&self, key: &str) -> Option<String> {
        let state = self.state.read();
        if state.points.is_empty() {
            return None;
        }
        let hash = ring_hash(key);
        state
            .points
            .range(hash..)
            .next()
            .or_else(|| state.points.iter().next())
            .map(|(_, member)| member.clone())
    }

    /// Whether `host` currently owns `key`.
    pub fn is_owned_by(&self, key: &str, host: &str) -> bool {
        self.lookup(key).as_deref() == Some(host)
    }

    /// A receiver observing the membership epoch; any change in membership
    /// bumps the value.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_member_owns_everything() {
        let ring = MembershipRing::new(vec!["host-a".into()]);
        for key in ["shard-0", "shard-1", "cluster-standby"] {
            assert_eq!(ring.lookup(key).as_deref(), Some("host-a"));
        }
    }

    #[test]
    fn lookup_is_stable_across_unrelated_changes() {
        let ring = MembershipRing::new(vec!["host-a".into(), "host-b".into(), "host-c".into()]);
        let owners: Vec<_> = (0..64).map(|i| ring.lookup(&format!("shard-{i}"))).collect();

        // Removing one member must not reshuffle keys between the survivors.
        ring.set_members(vec!["host-a".into(), "host-b".into()]);
        for (i, old_owner) in owners.iter().enumerate() {
            let new_owner = ring.lookup(&format!("shard-{i}"));
            if old_owner.as_deref() != Some("host-c") {
                assert_eq!(new_owner, *old_owner);
            } else {
                assert_ne!(new_owner.as_deref(), Some("host-c"));
            }
        }
    }

    #[test]
    fn membership_change_bumps_epoch() {
        let ring = MembershipRing::new(vec!["host-a".into()]);
        let rx = ring.subscribe();
        let before = *rx.borrow();
        ring.set_members(vec!["host-a".into(), "host-b".into()]);
        assert!(*rx.borrow() > before);
    }

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = MembershipRing::new(vec![]);
        assert!(ring.lookup("anything").is_none());
    }
}
