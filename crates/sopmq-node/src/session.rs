//! Server-side session state machine: `Unauthenticated` until the
//! challenge/response handshake succeeds, `Authenticated` afterward.
//! Any unexpected variant in either state is a protocol violation that
//! closes the connection without a reply.

use crate::quorum::Coordinator;
use crate::gossip::GossipWriter;
use crate::replica::ReplicaService;
use crate::ring::{Ring, RingNode};
use crate::rpc::{LocalReplicaClient, PeerConnectionPool, ReplicaClient, RemoteReplicaClient};
use crate::storage::StorageAdapter;
use crate::auth_store::AuthStore;
use rand::RngCore;
use sopmq_protocol::auth;
use sopmq_protocol::message::{
    AnswerChallengeBody, AuthAckBody, ChallengeResponseBody, ConsumeFromQueueBody,
    ConsumeResponseBody, GetChallengeBody, GossipBody, ProxyPublishBody, ProxyPublishPhase,
    ProxyPublishResponseBody, ProxyStatus, PublishBody, PublishResponseBody, QueuedMessage,
};
use sopmq_protocol::ProtocolMessage;
use sopmq_types::{CorrelationId, Identifier, REPLICA_COUNT};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Unauthenticated { challenge: Option<Vec<u8>> },
    Authenticated,
    Closed,
}

/// What the session loop should do after handling one inbound frame.
pub enum SessionOutcome {
    Reply(ProtocolMessage),
    ReplyAndClose(ProtocolMessage),
    Close,
}

/// Everything a session needs to answer requests, shared with every other
/// session on this node.
pub struct NodeContext {
    pub node_id: u64,
    pub auth_store: Arc<AuthStore>,
    pub ring: Arc<Ring>,
    pub storage: Arc<dyn StorageAdapter>,
    pub replica_service: Arc<ReplicaService>,
    pub peer_pool: Arc<PeerConnectionPool>,
    pub coordinator: Arc<Coordinator>,
    pub gossip_writer: Arc<GossipWriter>,
}

impl NodeContext {
    fn client_for(&self, node: &RingNode, expected_ids: &[u64; REPLICA_COUNT]) -> Arc<dyn ReplicaClient> {
        if node.node_id == self.node_id {
            Arc::new(LocalReplicaClient::new(self.replica_service.clone(), *expected_ids))
        } else {
            Arc::new(RemoteReplicaClient::new(
                self.peer_pool.clone(),
                node.endpoint.clone(),
                *expected_ids,
            ))
        }
    }
}

pub struct ServerSession {
    state: State,
    context: Arc<NodeContext>,
    next_id: AtomicU32,
    /// Tentative proposals this session has handed out as a replica,
    /// keyed by the queue and the coordinator's origin correlation, so the
    /// later `Commit` phase (which carries only the final clock) can find
    /// the row it's promoting.
    pending_proposals: std::collections::HashMap<(String, CorrelationId), sopmq_types::VectorClock>,
}

impl ServerSession {
    pub fn new(context: Arc<NodeContext>) -> ServerSession {
        ServerSession {
            state: State::Unauthenticated { challenge: None },
            context,
            next_id: AtomicU32::new(1),
            pending_proposals: std::collections::HashMap::new(),
        }
    }

    fn fresh_id(&self) -> CorrelationId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn handle(&mut self, msg: ProtocolMessage) -> SessionOutcome {
        match self.state {
            State::Unauthenticated { .. } => self.handle_unauthenticated(msg),
            State::Authenticated => self.handle_authenticated(msg).await,
            State::Closed => SessionOutcome::Close,
        }
    }

    fn handle_unauthenticated(&mut self, msg: ProtocolMessage) -> SessionOutcome {
        match msg {
            ProtocolMessage::GetChallenge(GetChallengeBody { identifier, .. }) => {
                let mut nonce = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut nonce);
                self.state = State::Unauthenticated {
                    challenge: Some(nonce.clone()),
                };
                SessionOutcome::Reply(ProtocolMessage::ChallengeResponse(ChallengeResponseBody {
                    identifier: Identifier::reply(self.fresh_id(), identifier.id),
                    challenge: nonce,
                }))
            }
            ProtocolMessage::AnswerChallenge(AnswerChallengeBody {
                identifier,
                uname_hash,
                challenge_response,
            }) => {
                let challenge = match &self.state {
                    State::Unauthenticated { challenge: Some(c) } => c.clone(),
                    _ => {
                        self.state = State::Closed;
                        return SessionOutcome::Close;
                    }
                };

                let authorized = self
                    .context
                    .auth_store
                    .pw_hash_for(&uname_hash)
                    .map(|pw_hash| {
                        auth::challenge_response_from_pw_hash(pw_hash, &challenge) == challenge_response
                    })
                    .unwrap_or(false);

                let reply = ProtocolMessage::AuthAck(AuthAckBody {
                    identifier: Identifier::reply(self.fresh_id(), identifier.id),
                    authorized,
                });

                if authorized {
                    self.state = State::Authenticated;
                    SessionOutcome::Reply(reply)
                } else {
                    self.state = State::Closed;
                    SessionOutcome::ReplyAndClose(reply)
                }
            }
            _ => {
                self.state = State::Closed;
                SessionOutcome::Close
            }
        }
    }

    async fn handle_authenticated(&mut self, msg: ProtocolMessage) -> SessionOutcome {
        match msg {
            ProtocolMessage::Publish(PublishBody {
                identifier,
                queue_id,
                payload,
            }) => {
                let ring = self.context.ring.snapshot();
                let context = self.context.clone();
                let outcome = context
                    .coordinator
                    .run_publish(&ring, &queue_id, payload, identifier.id, |node, expected_ids| {
                        context.client_for(node, expected_ids)
                    })
                    .await;

                SessionOutcome::Reply(ProtocolMessage::PublishResponse(PublishResponseBody {
                    identifier: Identifier::reply(self.fresh_id(), identifier.id),
                    outcome,
                }))
            }
            ProtocolMessage::ConsumeFromQueue(ConsumeFromQueueBody {
                identifier,
                queue_id,
                from_stamp,
                limit,
            }) => {
                let stored = self
                    .context
                    .storage
                    .read_range(&queue_id, from_stamp.as_ref(), limit as usize)
                    .await
                    .unwrap_or_default();

                let messages = stored
                    .into_iter()
                    .map(|m| QueuedMessage {
                        stamp: m.stamp,
                        payload: m.payload,
                    })
                    .collect();

                SessionOutcome::Reply(ProtocolMessage::ConsumeResponse(ConsumeResponseBody {
                    identifier: Identifier::reply(self.fresh_id(), identifier.id),
                    messages,
                }))
            }
            ProtocolMessage::ProxyPublish(ProxyPublishBody {
                identifier,
                queue_id,
                origin_correlation,
                phase,
            }) => {
                let (status, proposed_clock) = match phase {
                    ProxyPublishPhase::Tentative { payload, ttl_secs } => {
                        let expected_ids = self
                            .context
                            .ring
                            .snapshot()
                            .find_quorum_for_operation(sopmq_types::hash::ring_key(&queue_id))
                            .map(|replicas| [replicas[0].node_id, replicas[1].node_id, replicas[2].node_id]);

                        match expected_ids {
                            Ok(expected_ids) => {
                                let proposal = self
                                    .context
                                    .replica_service
                                    .propose(&queue_id, expected_ids, &payload, std::time::Duration::from_secs(ttl_secs as u64))
                                    .await;
                                if proposal.status == ProxyStatus::Queued {
                                    self.pending_proposals.insert(
                                        (queue_id.clone(), origin_correlation),
                                        proposal.proposed_clock.clone().expect("queued carries a clock"),
                                    );
                                }
                                (proposal.status, proposal.proposed_clock)
                            }
                            Err(_) => (ProxyStatus::Rejected, None),
                        }
                    }
                    ProxyPublishPhase::Commit { final_clock } => {
                        match self.pending_proposals.remove(&(queue_id.clone(), origin_correlation)) {
                            Some(proposed_clock) => {
                                match self
                                    .context
                                    .replica_service
                                    .commit(&queue_id, &proposed_clock, &final_clock)
                                    .await
                                {
                                    Ok(()) => (ProxyStatus::Queued, Some(final_clock)),
                                    Err(_) => (ProxyStatus::Rejected, None),
                                }
                            }
                            None => (ProxyStatus::Rejected, None),
                        }
                    }
                };

                SessionOutcome::Reply(ProtocolMessage::ProxyPublishResponse(ProxyPublishResponseBody {
                    identifier: Identifier::reply(self.fresh_id(), identifier.id),
                    status,
                    proposed_clock,
                }))
            }
            ProtocolMessage::Gossip(GossipBody { identifier, nodes }) => {
                let reply = match self.context.gossip_writer.apply_full_state(nodes) {
                    Ok(()) => self
                        .context
                        .ring
                        .snapshot()
                        .nodes()
                        .iter()
                        .map(|n| sopmq_protocol::message::GossipNodeEntry {
                            node_id: n.node_id,
                            range_start: n.range_start,
                            endpoint: n.endpoint.to_string(),
                        })
                        .collect(),
                    Err(e) => {
                        tracing::warn!(error = %e, "rejected gossip full-state update");
                        Vec::new()
                    }
                };

                SessionOutcome::Reply(ProtocolMessage::Gossip(GossipBody {
                    identifier: Identifier::reply(self.fresh_id(), identifier.id),
                    nodes: reply,
                }))
            }
            _ => {
                self.state = State::Closed;
                SessionOutcome::Close
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingSnapshot;
    use crate::storage::MemoryStorage;
    use sopmq_protocol::message::ChallengeRequester;
    use sopmq_types::Identifier;
    use std::time::Duration;

    fn test_context() -> Arc<NodeContext> {
        let mut auth_store = AuthStore::new();
        auth_store.add_user("alice", "good");
        let ring = Arc::new(Ring::new(RingSnapshot::new(vec![]).unwrap()));

        Arc::new(NodeContext {
            node_id: 1,
            auth_store: Arc::new(auth_store),
            ring: ring.clone(),
            storage: Arc::new(MemoryStorage::new()),
            replica_service: Arc::new(ReplicaService::new(1, Arc::new(MemoryStorage::new()))),
            peer_pool: Arc::new(PeerConnectionPool::new(8 * 1024 * 1024, "sopmq-node", "cluster-secret")),
            coordinator: Arc::new(Coordinator::new(Duration::from_secs(2), 30)),
            gossip_writer: Arc::new(GossipWriter::new(ring)),
        })
    }

    #[tokio::test]
    async fn full_auth_handshake_succeeds_with_correct_credentials() {
        let mut session = ServerSession::new(test_context());

        let reply = session
            .handle(ProtocolMessage::GetChallenge(GetChallengeBody {
                identifier: Identifier::request(1),
                requester: ChallengeRequester::Client,
            }))
            .await;
        let challenge = match reply {
            SessionOutcome::Reply(ProtocolMessage::ChallengeResponse(body)) => body.challenge,
            _ => panic!("expected ChallengeResponse"),
        };

        let uname_hash = auth::uname_hash("alice");
        let response = auth::challenge_response("good", &challenge);

        let reply = session
            .handle(ProtocolMessage::AnswerChallenge(AnswerChallengeBody {
                identifier: Identifier::request(2),
                uname_hash,
                challenge_response: response,
            }))
            .await;

        match reply {
            SessionOutcome::Reply(ProtocolMessage::AuthAck(body)) => assert!(body.authorized),
            _ => panic!("expected an authorized AuthAck"),
        }
        assert!(matches!(session.state, State::Authenticated));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_and_closes() {
        let mut session = ServerSession::new(test_context());

        session
            .handle(ProtocolMessage::GetChallenge(GetChallengeBody {
                identifier: Identifier::request(1),
                requester: ChallengeRequester::Client,
            }))
            .await;

        let reply = session
            .handle(ProtocolMessage::AnswerChallenge(AnswerChallengeBody {
                identifier: Identifier::request(2),
                uname_hash: auth::uname_hash("alice"),
                challenge_response: "wrong".to_string(),
            }))
            .await;

        match reply {
            SessionOutcome::ReplyAndClose(ProtocolMessage::AuthAck(body)) => assert!(!body.authorized),
            _ => panic!("expected a rejected AuthAck followed by close"),
        }
    }

    #[tokio::test]
    async fn unexpected_variant_while_unauthenticated_closes_without_reply() {
        let mut session = ServerSession::new(test_context());
        let outcome = session
            .handle(ProtocolMessage::AuthAck(AuthAckBody {
                identifier: Identifier::request(1),
                authorized: true,
            }))
            .await;
        assert!(matches!(outcome, SessionOutcome::Close));
    }

    #[tokio::test]
    async fn authenticated_session_rejects_a_second_get_challenge() {
        let context = test_context();
        let mut session = ServerSession::new(context);
        session.state = State::Authenticated;

        let outcome = session
            .handle(ProtocolMessage::GetChallenge(GetChallengeBody {
                identifier: Identifier::request(1),
                requester: ChallengeRequester::Client,
            }))
            .await;

        assert!(matches!(outcome, SessionOutcome::Close));
    }

    fn three_node_context() -> Arc<NodeContext> {
        let context = test_context();
        let nodes = vec![
            crate::ring::RingNode {
                node_id: 1,
                range_start: 0,
                endpoint: sopmq_types::Endpoint::new("node-1".to_string(), 7534),
            },
            crate::ring::RingNode {
                node_id: 2,
                range_start: 1u128 << 64,
                endpoint: sopmq_types::Endpoint::new("node-2".to_string(), 7534),
            },
            crate::ring::RingNode {
                node_id: 3,
                range_start: (1u128 << 64) + (1u128 << 63),
                endpoint: sopmq_types::Endpoint::new("node-3".to_string(), 7534),
            },
        ];
        context.ring.publish(RingSnapshot::new(nodes).unwrap());
        context
    }

    #[tokio::test]
    async fn proxy_publish_tentative_then_commit_round_trips() {
        let mut session = ServerSession::new(three_node_context());
        session.state = State::Authenticated;

        let reply = session
            .handle(ProtocolMessage::ProxyPublish(ProxyPublishBody {
                identifier: Identifier::request(1),
                queue_id: "orders".to_string(),
                origin_correlation: 42,
                phase: ProxyPublishPhase::Tentative {
                    payload: b"hello".to_vec(),
                    ttl_secs: 30,
                },
            }))
            .await;

        let proposed_clock = match reply {
            SessionOutcome::Reply(ProtocolMessage::ProxyPublishResponse(body)) => {
                assert_eq!(body.status, ProxyStatus::Queued);
                body.proposed_clock.unwrap()
            }
            _ => panic!("expected a queued ProxyPublishResponse"),
        };

        let reply = session
            .handle(ProtocolMessage::ProxyPublish(ProxyPublishBody {
                identifier: Identifier::request(2),
                queue_id: "orders".to_string(),
                origin_correlation: 42,
                phase: ProxyPublishPhase::Commit {
                    final_clock: proposed_clock,
                },
            }))
            .await;

        match reply {
            SessionOutcome::Reply(ProtocolMessage::ProxyPublishResponse(body)) => {
                assert_eq!(body.status, ProxyStatus::Queued);
            }
            _ => panic!("expected a queued commit ack"),
        }
    }

    #[tokio::test]
    async fn gossip_full_state_is_applied_and_echoed_back() {
        let mut session = ServerSession::new(three_node_context());
        session.state = State::Authenticated;

        let reply = session
            .handle(ProtocolMessage::Gossip(GossipBody {
                identifier: Identifier::request(1),
                nodes: vec![sopmq_protocol::message::GossipNodeEntry {
                    node_id: 9,
                    range_start: 1u128 << 100,
                    endpoint: "sopmq://node-9:7534".to_string(),
                }],
            }))
            .await;

        match reply {
            SessionOutcome::Reply(ProtocolMessage::Gossip(body)) => {
                assert_eq!(body.nodes.len(), 1);
                assert_eq!(body.nodes[0].node_id, 9);
            }
            _ => panic!("expected a Gossip ack"),
        }
    }
}
