//! The quorum coordinator: fans a publish out to the replica set the ring
//! selects, latches on the first `QUORUM_SIZE` successes, and commits.
//!
//! Grounded directly in `csauthenticated::handle_post_message`'s control
//! flow: the ring lookup happens first and synchronously (an
//! `unavailable_error` here means no RPC is ever attempted), replies are
//! folded into a latch as they arrive, and the latch fires its commit path
//! exactly once — everything after that point is logged and discarded.

use crate::ring::{RingNode, RingSnapshot};
use crate::rpc::{ProxyOutcome, ReplicaClient};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use sopmq_protocol::message::PublishOutcome;
use sopmq_types::{hash, CorrelationId, VectorClock, QUORUM_SIZE, REPLICA_COUNT};
use std::sync::Arc;
use std::time::Duration;

/// Default per-call deadline for one replica's `ProxyPublish` round trip.
pub const DEFAULT_RPC_DEADLINE: Duration = Duration::from_secs(2);

/// Default deadline for the whole publish operation: ring lookup, fan-out,
/// latch, and commit together. Bounds a publish even when a straggler
/// reply keeps trickling in just under the per-call deadline on every
/// retry, which the per-call timeout alone can't catch.
pub const DEFAULT_OPERATION_DEADLINE: Duration = Duration::from_secs(5);

/// Default TTL assigned to a tentative row at accept time, per the open
/// question resolution: no `AbortPublish`, rows just expire.
pub const DEFAULT_TENTATIVE_TTL_SECS: u32 = 30;

fn node_ids_match(clock: &VectorClock, expected: &[u64; REPLICA_COUNT]) -> bool {
    let mut got: Vec<u64> = clock.nodes().iter().map(|n| n.node_id).collect();
    got.sort_unstable();
    let mut expected_sorted = *expected;
    expected_sorted.sort_unstable();
    got == expected_sorted
}

pub struct Coordinator {
    rpc_deadline: Duration,
    tentative_ttl_secs: u32,
    operation_deadline: Duration,
}

impl Coordinator {
    pub fn new(rpc_deadline: Duration, tentative_ttl_secs: u32) -> Coordinator {
        Coordinator {
            rpc_deadline,
            tentative_ttl_secs,
            operation_deadline: DEFAULT_OPERATION_DEADLINE,
        }
    }

    /// Overrides the whole-operation deadline set by `new`.
    pub fn with_operation_deadline(mut self, operation_deadline: Duration) -> Coordinator {
        self.operation_deadline = operation_deadline;
        self
    }

    /// Runs one publish to completion, bounded overall by
    /// `operation_deadline` on top of each RPC's own `rpc_deadline`.
    pub async fn run_publish(
        &self,
        ring: &RingSnapshot,
        queue_id: &str,
        payload: Vec<u8>,
        origin_correlation: CorrelationId,
        client_for: impl Fn(&RingNode, &[u64; REPLICA_COUNT]) -> Arc<dyn ReplicaClient>,
    ) -> PublishOutcome {
        match tokio::time::timeout(
            self.operation_deadline,
            self.run_publish_inner(ring, queue_id, payload, origin_correlation, client_for),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(queue_id, "publish exceeded its operation deadline");
                PublishOutcome::Unavailable
            }
        }
    }

    async fn run_publish_inner(
        &self,
        ring: &RingSnapshot,
        queue_id: &str,
        payload: Vec<u8>,
        origin_correlation: CorrelationId,
        client_for: impl Fn(&RingNode, &[u64; REPLICA_COUNT]) -> Arc<dyn ReplicaClient>,
    ) -> PublishOutcome {
        let replicas = match ring.find_quorum_for_operation(hash::ring_key(queue_id)) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(queue_id, error = %e, "no quorum available, skipping fan-out");
                return PublishOutcome::Unavailable;
            }
        };

        let expected_ids = [replicas[0].node_id, replicas[1].node_id, replicas[2].node_id];

        let mut in_flight = FuturesUnordered::new();
        for node in replicas.iter() {
            let client = client_for(node, &expected_ids);
            let node = node.clone();
            let queue_id = queue_id.to_string();
            let payload = payload.clone();
            let deadline = self.rpc_deadline;
            let ttl_secs = self.tentative_ttl_secs;
            in_flight.push(async move {
                let result = tokio::time::timeout(
                    deadline,
                    client.propose(&queue_id, payload, origin_correlation, ttl_secs),
                )
                .await;
                (node, client, result)
            });
        }

        let mut successes: Vec<(RingNode, Arc<dyn ReplicaClient>, VectorClock)> = Vec::new();
        let mut failure_count = 0usize;

        let outcome = loop {
            let Some((node, client, result)) = in_flight.next().await else {
                break PublishOutcome::Unavailable;
            };

            match result {
                Ok(Ok(ProxyOutcome::Queued { proposed_clock })) if node_ids_match(&proposed_clock, &expected_ids) => {
                    successes.push((node, client, proposed_clock));
                }
                Ok(Ok(ProxyOutcome::Queued { .. })) => {
                    tracing::warn!(node_id = node.node_id, "replica clock had mismatched node id set");
                    failure_count += 1;
                }
                Ok(Ok(other)) => {
                    tracing::warn!(node_id = node.node_id, status = ?other, "replica rejected publish");
                    failure_count += 1;
                }
                Ok(Err(e)) => {
                    tracing::warn!(node_id = node.node_id, error = %e, "replica propose failed");
                    failure_count += 1;
                }
                Err(_) => {
                    tracing::warn!(node_id = node.node_id, "replica propose timed out");
                    failure_count += 1;
                }
            }

            if successes.len() >= QUORUM_SIZE {
                break self.commit(queue_id, &successes).await;
            }

            if failure_count > REPLICA_COUNT - QUORUM_SIZE {
                break PublishOutcome::Unavailable;
            }
        };

        outcome
    }

    async fn commit(
        &self,
        queue_id: &str,
        successes: &[(RingNode, Arc<dyn ReplicaClient>, VectorClock)],
    ) -> PublishOutcome {
        let mut final_clock = successes[0].2.clone();
        for (_, _, clock) in successes.iter().skip(1) {
            final_clock = VectorClock::merge(&final_clock, clock)
                .expect("node id sets were validated before counting as a success");
        }

        let commits: FuturesUnordered<_> = successes
            .iter()
            .map(|(node, client, _)| {
                let client = client.clone();
                let final_clock = final_clock.clone();
                let queue_id = queue_id.to_string();
                let node_id = node.node_id;
                async move {
                    if let Err(e) = client.commit(&queue_id, &final_clock).await {
                        tracing::warn!(node_id, error = %e, "commit directive failed after quorum was reached");
                    }
                }
            })
            .collect();
        commits.collect::<Vec<_>>().await;

        PublishOutcome::Ok { stamp: final_clock }
    }
}
