//! Fixed-width (N=3) causal vector clock, one counter per replica.
//!
//! A `VectorClock` is a snapshot of per-replica monotone counters for a
//! single queue's replica set. Two clocks can only be compared or merged
//! if they carry an identical set of node ids — a mismatch means the
//! replica set itself has diverged, which is a hard error rather than
//! something silently papered over.

use crate::error::SopmqError;
use crate::REPLICA_COUNT;
use serde::{Deserialize, Serialize};

/// One replica's monotone counter within a vector clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeClock {
    pub node_id: u64,
    pub counter: u64,
}

impl NodeClock {
    pub fn new(node_id: u64, counter: u64) -> NodeClock {
        NodeClock { node_id, counter }
    }
}

/// Result of comparing two vector clocks under the standard per-component
/// dominance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    Before,
    After,
    Equal,
    Concurrent,
}

/// A fixed-width (N=3) vector clock. Node ids are always stored sorted
/// ascending and distinct; this is checked on construction so that every
/// `VectorClock` that exists in the program satisfies the invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    nodes: [NodeClock; REPLICA_COUNT],
}

impl VectorClock {
    /// Builds a clock from `nodes`, sorting by `node_id` ascending.
    /// Fails if the node ids aren't distinct.
    pub fn new(mut nodes: [NodeClock; REPLICA_COUNT]) -> Result<VectorClock, SopmqError> {
        nodes.sort_by_key(|n| n.node_id);
        for pair in nodes.windows(2) {
            if pair[0].node_id == pair[1].node_id {
                return Err(SopmqError::ComparisonError);
            }
        }
        Ok(VectorClock { nodes })
    }

    /// A zeroed clock for exactly the given (distinct) node ids.
    pub fn zero(mut node_ids: [u64; REPLICA_COUNT]) -> Result<VectorClock, SopmqError> {
        node_ids.sort_unstable();
        let nodes = node_ids.map(|id| NodeClock::new(id, 0));
        VectorClock::new(nodes)
    }

    pub fn nodes(&self) -> &[NodeClock; REPLICA_COUNT] {
        &self.nodes
    }

    fn node_id_set(&self) -> [u64; REPLICA_COUNT] {
        let mut ids = [0u64; REPLICA_COUNT];
        for (i, n) in self.nodes.iter().enumerate() {
            ids[i] = n.node_id;
        }
        ids
    }

    fn same_replica_set(&self, other: &VectorClock) -> bool {
        self.node_id_set() == other.node_id_set()
    }

    pub fn counter_for(&self, node_id: u64) -> Option<u64> {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .map(|n| n.counter)
    }

    /// Increments `node_id`'s counter by 1. Fails if `node_id` is not part
    /// of this clock's replica set.
    pub fn increment(&mut self, node_id: u64) -> Result<(), SopmqError> {
        let entry = self
            .nodes
            .iter_mut()
            .find(|n| n.node_id == node_id)
            .ok_or_else(|| SopmqError::ProtocolViolation(format!("unknown node id {node_id}")))?;
        entry.counter += 1;
        Ok(())
    }

    /// Pairwise-max merge. Fails with `ComparisonError` if `a` and `b`
    /// don't share an identical set of node ids.
    pub fn merge(a: &VectorClock, b: &VectorClock) -> Result<VectorClock, SopmqError> {
        if !a.same_replica_set(b) {
            return Err(SopmqError::ComparisonError);
        }
        let mut nodes = a.nodes;
        for node in nodes.iter_mut() {
            let other_counter = b.counter_for(node.node_id).expect("same replica set");
            node.counter = node.counter.max(other_counter);
        }
        Ok(VectorClock { nodes })
    }

    /// Standard per-component dominance comparison. Fails with
    /// `ComparisonError` if the replica sets differ.
    pub fn compare(a: &VectorClock, b: &VectorClock) -> Result<ClockOrdering, SopmqError> {
        if !a.same_replica_set(b) {
            return Err(SopmqError::ComparisonError);
        }
        let mut a_ahead = false;
        let mut b_ahead = false;
        for node in a.nodes.iter() {
            let other_counter = b.counter_for(node.node_id).expect("same replica set");
            if node.counter > other_counter {
                a_ahead = true;
            } else if node.counter < other_counter {
                b_ahead = true;
            }
        }
        Ok(match (a_ahead, b_ahead) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::After,
            (false, true) => ClockOrdering::Before,
            (true, true) => ClockOrdering::Concurrent,
        })
    }
}
