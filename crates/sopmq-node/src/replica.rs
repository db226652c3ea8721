//! The replica side of a publish: what a node does when it receives a
//! `ProxyPublish` from some coordinator, whether that coordinator is a
//! remote peer or this same node acting as its own coordinator.
//!
//! Each replica tracks its own view of a queue's vector clock so it can
//! propose a clock advance independently of the other replicas; the
//! coordinator only ever merges clocks it has already received.

use crate::storage::StorageAdapter;
use sopmq_protocol::message::ProxyStatus;
use sopmq_types::{SopmqError, VectorClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct ReplicaProposal {
    pub status: ProxyStatus,
    pub proposed_clock: Option<VectorClock>,
}

/// One node's replica-side state: its id, its storage, and its
/// per-queue view of where each queue's vector clock currently stands.
pub struct ReplicaService {
    node_id: u64,
    storage: Arc<dyn StorageAdapter>,
    clocks: Mutex<HashMap<String, VectorClock>>,
}

impl ReplicaService {
    pub fn new(node_id: u64, storage: Arc<dyn StorageAdapter>) -> ReplicaService {
        ReplicaService {
            node_id,
            storage,
            clocks: Mutex::new(HashMap::new()),
        }
    }

    /// Handles the tentative phase of a `ProxyPublish`: advances this
    /// node's counter in the queue's clock and writes a tentative row.
    pub async fn propose(
        &self,
        queue_id: &str,
        replica_node_ids: [u64; sopmq_types::REPLICA_COUNT],
        payload: &[u8],
        ttl: Duration,
    ) -> ReplicaProposal {
        let mut candidate = {
            let clocks = self.clocks.lock().unwrap();
            clocks
                .get(queue_id)
                .cloned()
                .unwrap_or_else(|| VectorClock::zero(replica_node_ids).expect("distinct node ids"))
        };

        if candidate.increment(self.node_id).is_err() {
            return ReplicaProposal {
                status: ProxyStatus::ClockError,
                proposed_clock: None,
            };
        }

        if let Err(e) = self
            .storage
            .tentative_accept(queue_id, payload, &candidate, ttl)
            .await
        {
            tracing::warn!(queue_id, error = %e, "tentative_accept failed");
            return ReplicaProposal {
                status: ProxyStatus::Overloaded,
                proposed_clock: None,
            };
        }

        self.clocks
            .lock()
            .unwrap()
            .insert(queue_id.to_string(), candidate.clone());

        ReplicaProposal {
            status: ProxyStatus::Queued,
            proposed_clock: Some(candidate),
        }
    }

    /// Handles the commit phase: promotes the tentative row to committed
    /// under the coordinator's merged `final_clock`.
    pub async fn commit(
        &self,
        queue_id: &str,
        proposed_clock: &VectorClock,
        final_clock: &VectorClock,
    ) -> Result<(), SopmqError> {
        self.storage.commit(queue_id, proposed_clock, final_clock).await?;
        self.clocks
            .lock()
            .unwrap()
            .insert(queue_id.to_string(), final_clock.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn propose_increments_own_counter_only() {
        let service = ReplicaService::new(2, Arc::new(MemoryStorage::new()));
        let proposal = service
            .propose("orders", [1, 2, 3], b"payload", Duration::from_secs(5))
            .await;
        assert_eq!(proposal.status, ProxyStatus::Queued);
        let clock = proposal.proposed_clock.unwrap();
        assert_eq!(clock.counter_for(1), Some(0));
        assert_eq!(clock.counter_for(2), Some(1));
        assert_eq!(clock.counter_for(3), Some(0));
    }

    #[tokio::test]
    async fn repeated_proposals_keep_advancing_the_clock() {
        let service = ReplicaService::new(1, Arc::new(MemoryStorage::new()));
        let first = service
            .propose("orders", [1, 2, 3], b"a", Duration::from_secs(5))
            .await;
        let second = service
            .propose("orders", [1, 2, 3], b"b", Duration::from_secs(5))
            .await;
        assert_eq!(first.proposed_clock.unwrap().counter_for(1), Some(1));
        assert_eq!(second.proposed_clock.unwrap().counter_for(1), Some(2));
    }

    #[tokio::test]
    async fn commit_updates_storage_and_local_clock_view() {
        let service = ReplicaService::new(1, Arc::new(MemoryStorage::new()));
        let proposal = service
            .propose("orders", [1, 2, 3], b"payload", Duration::from_secs(5))
            .await;
        let proposed = proposal.proposed_clock.unwrap();
        let mut final_clock = proposed.clone();
        final_clock.increment(2).unwrap();

        service.commit("orders", &proposed, &final_clock).await.unwrap();

        let messages = service
            .storage
            .read_range("orders", None, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].stamp, final_clock);
    }
}
