//! The single writer that turns incoming `Gossip` frames into new ring
//! snapshots. No other component ever calls `Ring::publish`.

use crate::ring::{Ring, RingNode, RingSnapshot};
use sopmq_protocol::message::GossipNodeEntry;
use sopmq_types::{Endpoint, SopmqError};
use std::sync::Arc;

pub struct GossipWriter {
    ring: Arc<Ring>,
}

impl GossipWriter {
    pub fn new(ring: Arc<Ring>) -> GossipWriter {
        GossipWriter { ring }
    }

    /// Replaces ring membership wholesale with `entries`. The reference
    /// gossip protocol is a full-state exchange rather than a delta, so
    /// there's no incremental merge step here — just validate and swap.
    pub fn apply_full_state(&self, entries: Vec<GossipNodeEntry>) -> Result<(), SopmqError> {
        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            let endpoint = Endpoint::parse(&entry.endpoint)?;
            nodes.push(RingNode {
                node_id: entry.node_id,
                range_start: entry.range_start,
                endpoint,
            });
        }
        let snapshot = RingSnapshot::new(nodes)?;
        self.ring.publish(snapshot);
        Ok(())
    }
}
