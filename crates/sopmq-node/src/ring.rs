//! Consistent-hash ring mapping a 128-bit key to a replica set of size
//! `REPLICA_COUNT`.
//!
//! The ring is shared-read, single-writer: only the gossip task ever
//! builds a new `RingSnapshot` and publishes it. Readers clone the `Arc`
//! under the shortest critical section `parking_lot` can offer and do all
//! their work against the cloned snapshot, so a publish never blocks a
//! reader mid-operation.

use parking_lot::RwLock;
use sopmq_types::{Endpoint, SopmqError, REPLICA_COUNT};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingNode {
    pub node_id: u64,
    pub range_start: u128,
    pub endpoint: Endpoint,
}

/// An immutable, sorted view of ring membership at one point in time.
#[derive(Debug, Clone)]
pub struct RingSnapshot {
    nodes: Vec<RingNode>,
}

impl RingSnapshot {
    /// Builds a snapshot from `nodes`, sorting by `range_start`. Fails if
    /// two entries share a `range_start` or a `node_id`.
    pub fn new(mut nodes: Vec<RingNode>) -> Result<RingSnapshot, SopmqError> {
        nodes.sort_by(|a, b| a.range_start.cmp(&b.range_start).then(a.node_id.cmp(&b.node_id)));

        for pair in nodes.windows(2) {
            if pair[0].range_start == pair[1].range_start {
                return Err(SopmqError::ProtocolViolation(format!(
                    "duplicate range_start {}",
                    pair[0].range_start
                )));
            }
        }

        let mut node_ids: Vec<u64> = nodes.iter().map(|n| n.node_id).collect();
        node_ids.sort_unstable();
        node_ids.dedup();
        if node_ids.len() != nodes.len() {
            return Err(SopmqError::ProtocolViolation(
                "duplicate node_id in ring".to_string(),
            ));
        }

        Ok(RingSnapshot { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[RingNode] {
        &self.nodes
    }

    /// Finds the smallest entry whose `range_start > key`, wrapping to
    /// index 0 if `key` is at or past the last entry's range start.
    fn successor_index(&self, key: u128) -> usize {
        match self.nodes.partition_point(|n| n.range_start <= key) {
            i if i == self.nodes.len() => 0,
            i => i,
        }
    }

    /// Selects the `REPLICA_COUNT` replicas responsible for `key`: the
    /// successor entry and its `REPLICA_COUNT - 1` ring successors,
    /// wrapping. Fails with `Unavailable` if fewer than `REPLICA_COUNT`
    /// distinct nodes exist on the ring.
    pub fn find_quorum_for_operation(&self, key: u128) -> Result<[RingNode; REPLICA_COUNT], SopmqError> {
        if self.nodes.len() < REPLICA_COUNT {
            return Err(SopmqError::Unavailable(format!(
                "ring has only {} of {REPLICA_COUNT} required nodes",
                self.nodes.len()
            )));
        }

        let start = self.successor_index(key);
        let mut replicas = Vec::with_capacity(REPLICA_COUNT);
        for offset in 0..REPLICA_COUNT {
            let idx = (start + offset) % self.nodes.len();
            replicas.push(self.nodes[idx].clone());
        }

        replicas
            .try_into()
            .map_err(|_| SopmqError::Unavailable("could not form replica set".to_string()))
    }
}

/// Shared, single-writer ring handle.
pub struct Ring {
    inner: RwLock<Arc<RingSnapshot>>,
}

impl Ring {
    pub fn new(initial: RingSnapshot) -> Ring {
        Ring {
            inner: RwLock::new(Arc::new(initial)),
        }
    }

    /// One snapshot, valid for the duration of the caller's operation.
    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.inner.read().clone()
    }

    /// Publishes a new snapshot. Called only by the gossip task.
    pub fn publish(&self, snapshot: RingSnapshot) {
        *self.inner.write() = Arc::new(snapshot);
    }
}
