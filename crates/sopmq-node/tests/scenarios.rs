//! End-to-end exercises of a node's publish/auth/framing behavior, each
//! built against the crate's public surface rather than any single
//! module's internals.

use async_trait::async_trait;
use sopmq_node::{
    AuthStore, Coordinator, GossipWriter, MemoryStorage, NodeContext, NodeServer,
    PeerConnectionPool, ReplicaService, Ring, RingNode, RingSnapshot,
};
use sopmq_node::rpc::{ProxyOutcome, ReplicaClient};
use sopmq_node::session::{ServerSession, SessionOutcome};
use sopmq_protocol::message::{
    AnswerChallengeBody, AuthAckBody, ChallengeRequester, GetChallengeBody, PublishBody,
    PublishOutcome, PublishResponseBody,
};
use sopmq_protocol::{auth, ProtocolMessage, SopmqCodec};
use sopmq_types::{CorrelationId, Endpoint, Identifier, SopmqError, VectorClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::codec::{Decoder, Encoder};

/// Shared peer credential every in-test node is configured with, so pooled
/// node-to-node connections can pass the same challenge/response
/// handshake a client goes through.
const NODE_USERNAME: &str = "sopmq-node";
const NODE_PASSWORD: &str = "cluster-secret";

fn node_auth_store() -> AuthStore {
    let mut auth_store = AuthStore::new();
    auth_store.add_user("alice", "good");
    auth_store.add_user(NODE_USERNAME, NODE_PASSWORD);
    auth_store
}

fn three_node_ring() -> RingSnapshot {
    RingSnapshot::new(vec![
        RingNode {
            node_id: 1,
            range_start: 0,
            endpoint: Endpoint::new("node-1", 7534),
        },
        RingNode {
            node_id: 2,
            range_start: 1u128 << 64,
            endpoint: Endpoint::new("node-2", 7534),
        },
        RingNode {
            node_id: 3,
            range_start: (1u128 << 64) + (1u128 << 63),
            endpoint: Endpoint::new("node-3", 7534),
        },
    ])
    .unwrap()
}

fn context_with_ring(snapshot: RingSnapshot) -> Arc<NodeContext> {
    let ring = Arc::new(Ring::new(snapshot));

    Arc::new(NodeContext {
        node_id: 1,
        auth_store: Arc::new(node_auth_store()),
        ring: ring.clone(),
        storage: Arc::new(MemoryStorage::new()),
        replica_service: Arc::new(ReplicaService::new(1, Arc::new(MemoryStorage::new()))),
        peer_pool: Arc::new(PeerConnectionPool::new(8 * 1024 * 1024, NODE_USERNAME, NODE_PASSWORD)),
        coordinator: Arc::new(Coordinator::new(Duration::from_secs(2), 30)),
        gossip_writer: Arc::new(GossipWriter::new(ring)),
    })
}

/// Spawns real `NodeServer`s for replicas 2 and 3 on ephemeral localhost
/// ports and returns (the resulting ring, node 1's context) so a publish
/// issued against node 1 actually fans out over the network to quorum.
async fn three_real_nodes() -> Arc<NodeContext> {
    let listener2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr2 = listener2.local_addr().unwrap();
    let listener3 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr3 = listener3.local_addr().unwrap();

    let snapshot = RingSnapshot::new(vec![
        RingNode {
            node_id: 1,
            range_start: 0,
            endpoint: Endpoint::new("127.0.0.1", 0),
        },
        RingNode {
            node_id: 2,
            range_start: 1u128 << 64,
            endpoint: Endpoint::new(addr2.ip().to_string(), addr2.port()),
        },
        RingNode {
            node_id: 3,
            range_start: (1u128 << 64) + (1u128 << 63),
            endpoint: Endpoint::new(addr3.ip().to_string(), addr3.port()),
        },
    ])
    .unwrap();

    for (node_id, listener) in [(2u64, listener2), (3u64, listener3)] {
        let ring = Arc::new(Ring::new(snapshot.clone()));
        let storage = Arc::new(MemoryStorage::new());
        let context = Arc::new(NodeContext {
            node_id,
            auth_store: Arc::new(node_auth_store()),
            ring: ring.clone(),
            storage: storage.clone(),
            replica_service: Arc::new(ReplicaService::new(node_id, storage)),
            peer_pool: Arc::new(PeerConnectionPool::new(8 * 1024 * 1024, NODE_USERNAME, NODE_PASSWORD)),
            coordinator: Arc::new(Coordinator::new(Duration::from_secs(2), 30)),
            gossip_writer: Arc::new(GossipWriter::new(ring)),
        });
        let server = NodeServer::new(context, 8 * 1024 * 1024);
        tokio::spawn(async move {
            let _ = server.serve_listener(listener).await;
        });
    }

    let ring = Arc::new(Ring::new(snapshot));
    let storage = Arc::new(MemoryStorage::new());
    Arc::new(NodeContext {
        node_id: 1,
        auth_store: Arc::new(node_auth_store()),
        ring: ring.clone(),
        storage,
        replica_service: Arc::new(ReplicaService::new(1, Arc::new(MemoryStorage::new()))),
        peer_pool: Arc::new(PeerConnectionPool::new(8 * 1024 * 1024, NODE_USERNAME, NODE_PASSWORD)),
        coordinator: Arc::new(Coordinator::new(Duration::from_secs(2), 30)),
        gossip_writer: Arc::new(GossipWriter::new(ring)),
    })
}

async fn authenticate(session: &mut ServerSession) {
    let reply = session
        .handle(ProtocolMessage::GetChallenge(GetChallengeBody {
            identifier: Identifier::request(1),
            requester: ChallengeRequester::Client,
        }))
        .await;
    let challenge = match reply {
        SessionOutcome::Reply(ProtocolMessage::ChallengeResponse(body)) => body.challenge,
        _ => panic!("expected a challenge"),
    };

    let reply = session
        .handle(ProtocolMessage::AnswerChallenge(AnswerChallengeBody {
            identifier: Identifier::request(2),
            uname_hash: auth::uname_hash("alice"),
            challenge_response: auth::challenge_response("good", &challenge),
        }))
        .await;
    match reply {
        SessionOutcome::Reply(ProtocolMessage::AuthAck(AuthAckBody { authorized, .. })) => {
            assert!(authorized)
        }
        _ => panic!("expected a successful auth ack"),
    }
}

#[tokio::test]
async fn happy_publish_reaches_quorum_and_commits() {
    // Nodes 2 and 3 are real, separately-authenticating `NodeServer`s on
    // ephemeral ports, so this actually exercises the ProxyPublish RPC and
    // the node-to-node handshake, not just node 1's local replica.
    let mut session = ServerSession::new(three_real_nodes().await);
    authenticate(&mut session).await;

    let reply = session
        .handle(ProtocolMessage::Publish(PublishBody {
            identifier: Identifier::request(3),
            queue_id: "orders".to_string(),
            payload: b"order-42".to_vec(),
        }))
        .await;

    match reply {
        SessionOutcome::Reply(ProtocolMessage::PublishResponse(PublishResponseBody {
            outcome,
            ..
        })) => assert!(matches!(outcome, PublishOutcome::Ok { .. })),
        _ => panic!("expected a committed publish response"),
    }
}

#[tokio::test]
async fn publish_is_unavailable_with_only_two_ring_nodes() {
    let ring = RingSnapshot::new(vec![
        RingNode {
            node_id: 1,
            range_start: 0,
            endpoint: Endpoint::new("node-1", 7534),
        },
        RingNode {
            node_id: 2,
            range_start: 1u128 << 64,
            endpoint: Endpoint::new("node-2", 7534),
        },
    ])
    .unwrap();

    let mut session = ServerSession::new(context_with_ring(ring));
    authenticate(&mut session).await;

    let reply = session
        .handle(ProtocolMessage::Publish(PublishBody {
            identifier: Identifier::request(3),
            queue_id: "orders".to_string(),
            payload: b"order-42".to_vec(),
        }))
        .await;

    match reply {
        SessionOutcome::Reply(ProtocolMessage::PublishResponse(PublishResponseBody {
            outcome,
            ..
        })) => assert!(matches!(outcome, PublishOutcome::Unavailable)),
        _ => panic!("expected an unavailable publish response"),
    }
}

struct MismatchedClockClient;

#[async_trait]
impl ReplicaClient for MismatchedClockClient {
    async fn propose(
        &self,
        _queue_id: &str,
        _payload: Vec<u8>,
        _origin_correlation: CorrelationId,
        _ttl_secs: u32,
    ) -> Result<ProxyOutcome, SopmqError> {
        // Reports success, but for a replica set that doesn't match the
        // ring's current view — the coordinator must treat this as a
        // failure, not a success, even though the RPC itself succeeded.
        Ok(ProxyOutcome::Queued {
            proposed_clock: VectorClock::zero([97, 98, 99]).unwrap(),
        })
    }

    async fn commit(&self, _queue_id: &str, _final_clock: &VectorClock) -> Result<(), SopmqError> {
        Ok(())
    }
}

#[tokio::test]
async fn clock_mismatch_is_treated_as_a_failed_replica() {
    let ring = three_node_ring();
    let coordinator = Coordinator::new(Duration::from_secs(2), 30);

    let outcome = coordinator
        .run_publish(&ring, "orders", b"payload".to_vec(), 1, |_node, _expected_ids| {
            Arc::new(MismatchedClockClient) as Arc<dyn ReplicaClient>
        })
        .await;

    assert!(matches!(outcome, PublishOutcome::Unavailable));
}

#[tokio::test]
async fn wrong_credentials_fail_the_handshake_and_end_the_session() {
    let mut session = ServerSession::new(context_with_ring(three_node_ring()));

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
            challenge_response: "not-the-right-answer".to_string(),
        }))
        .await;

    match reply {
        SessionOutcome::ReplyAndClose(ProtocolMessage::AuthAck(AuthAckBody { authorized, .. })) => {
            assert!(!authorized)
        }
        _ => panic!("expected a rejected auth ack followed by connection close"),
    }

    // The session is now closed; any further message gets no reply at all.
    let outcome = session
        .handle(ProtocolMessage::Publish(PublishBody {
            identifier: Identifier::request(3),
            queue_id: "orders".to_string(),
            payload: vec![],
        }))
        .await;
    assert!(matches!(outcome, SessionOutcome::Close));
}

#[tokio::test]
async fn authenticated_connection_sending_get_challenge_is_a_protocol_violation() {
    let mut session = ServerSession::new(context_with_ring(three_node_ring()));
    authenticate(&mut session).await;

    let outcome = session
        .handle(ProtocolMessage::GetChallenge(GetChallengeBody {
            identifier: Identifier::request(10),
            requester: ChallengeRequester::Client,
        }))
        .await;

    // No reply is sent; the connection is simply closed.
    assert!(matches!(outcome, SessionOutcome::Close));
}

#[test]
fn a_declared_frame_length_over_the_cap_closes_the_connection_without_decoding() {
    let mut codec = SopmqCodec::new(64);
    let mut buf = bytes::BytesMut::new();

    // A well-formed header declaring a body far larger than this node's
    // cap: the decoder must reject it before it ever buffers the body.
    let oversize_msg = ProtocolMessage::Publish(PublishBody {
        identifier: Identifier::request(1),
        queue_id: "orders".to_string(),
        payload: vec![0u8; 4096],
    });
    let mut oversized_codec = SopmqCodec::default();
    Encoder::<ProtocolMessage>::encode(&mut oversized_codec, oversize_msg, &mut buf).unwrap();

    let err = Decoder::decode(&mut codec, &mut buf).unwrap_err();
    assert!(matches!(err, SopmqError::OversizeMessage { .. }));
}
