//! Intra-node RPC: how a coordinator talks to the replicas it fanned a
//! publish out to, whether that replica is a remote peer or this node.
//!
//! Outbound peer connections are long-lived and pooled one-per-peer,
//! mirroring the reference server's `OutgoingConnectionCreator` /
//! `PeerSystemConnection` split — connection establishment is kept
//! separate from connection use, translated here to `tokio` tasks and
//! `async`/`await` instead of `tokio-core` and `futures` 0.1 combinators.

use crate::replica::ReplicaService;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use sopmq_protocol::auth;
use sopmq_protocol::dispatcher::DispatchOutcome;
use sopmq_protocol::message::{
    AnswerChallengeBody, AuthAckBody, ChallengeRequester, ChallengeResponseBody, GetChallengeBody,
    ProxyPublishBody, ProxyPublishPhase, ProxyPublishResponseBody, ProxyStatus,
};
use sopmq_protocol::{CorrelationDispatcher, ProtocolMessage, SopmqCodec};
use sopmq_types::{CorrelationId, Endpoint, Identifier, SopmqError, VectorClock, REPLICA_COUNT};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::Framed;

/// What a replica told the coordinator about a tentative publish.
#[derive(Debug, Clone)]
pub enum ProxyOutcome {
    Queued { proposed_clock: VectorClock },
    Rejected,
    Overloaded,
    ClockError,
}

/// The coordinator's view of one replica: propose a tentative row, then
/// either commit or abandon it.
#[async_trait]
pub trait ReplicaClient: Send + Sync {
    async fn propose(
        &self,
        queue_id: &str,
        payload: Vec<u8>,
        origin_correlation: CorrelationId,
        ttl_secs: u32,
    ) -> Result<ProxyOutcome, SopmqError>;

    async fn commit(&self, queue_id: &str, final_clock: &VectorClock) -> Result<(), SopmqError>;
}

/// A `ReplicaClient` for a replica that happens to be this same node —
/// no network hop, no framing, straight to the `ReplicaService`.
pub struct LocalReplicaClient {
    service: Arc<ReplicaService>,
    replica_node_ids: [u64; REPLICA_COUNT],
    last_proposed: Mutex<Option<VectorClock>>,
}

impl LocalReplicaClient {
    pub fn new(service: Arc<ReplicaService>, replica_node_ids: [u64; REPLICA_COUNT]) -> LocalReplicaClient {
        LocalReplicaClient {
            service,
            replica_node_ids,
            last_proposed: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ReplicaClient for LocalReplicaClient {
    async fn propose(
        &self,
        queue_id: &str,
        payload: Vec<u8>,
        _origin_correlation: CorrelationId,
        ttl_secs: u32,
    ) -> Result<ProxyOutcome, SopmqError> {
        let proposal = self
            .service
            .propose(
                queue_id,
                self.replica_node_ids,
                &payload,
                Duration::from_secs(ttl_secs as u64),
            )
            .await;

        *self.last_proposed.lock().await = proposal.proposed_clock.clone();

        Ok(match proposal.status {
            ProxyStatus::Queued => ProxyOutcome::Queued {
                proposed_clock: proposal.proposed_clock.expect("queued carries a clock"),
            },
            ProxyStatus::Rejected => ProxyOutcome::Rejected,
            ProxyStatus::Overloaded => ProxyOutcome::Overloaded,
            ProxyStatus::ClockError => ProxyOutcome::ClockError,
        })
    }

    async fn commit(&self, queue_id: &str, final_clock: &VectorClock) -> Result<(), SopmqError> {
        let proposed = self
            .last_proposed
            .lock()
            .await
            .clone()
            .ok_or_else(|| SopmqError::ProtocolViolation("commit with no prior proposal".into()))?;
        self.service.commit(queue_id, &proposed, final_clock).await
    }
}

type Builder = Box<dyn FnOnce(CorrelationId) -> ProtocolMessage + Send>;

struct PendingSend {
    build: Builder,
    expected_variant: &'static str,
    reply_to: oneshot::Sender<Result<ProtocolMessage, SopmqError>>,
}

#[derive(Clone)]
struct PeerConnectionHandle {
    commands: mpsc::UnboundedSender<PendingSend>,
}

impl PeerConnectionHandle {
    async fn request(
        &self,
        expected_variant: &'static str,
        build: impl FnOnce(CorrelationId) -> ProtocolMessage + Send + 'static,
    ) -> Result<ProtocolMessage, SopmqError> {
        let (reply_to, rx) = oneshot::channel();
        self.commands
            .send(PendingSend {
                build: Box::new(build),
                expected_variant,
                reply_to,
            })
            .map_err(|_| SopmqError::Network("peer connection task gone".into()))?;
        rx.await.map_err(|_| SopmqError::Network("peer connection task gone".into()))?
    }
}

/// Runs the challenge/response handshake as `ChallengeRequester::Node`
/// before a pooled connection is used for `ProxyPublish`. A peer's session
/// starts `Unauthenticated` and treats `ProxyPublish`/`Gossip` as a
/// protocol violation until this completes, same as it would for a client.
async fn authenticate_peer_connection(
    framed: &mut Framed<TcpStream, SopmqCodec>,
    node_username: &str,
    node_password: &str,
) -> Result<(), SopmqError> {
    framed
        .send(ProtocolMessage::GetChallenge(GetChallengeBody {
            identifier: Identifier::request(1),
            requester: ChallengeRequester::Node,
        }))
        .await
        .map_err(|e| SopmqError::Network(e.to_string()))?;

    let challenge = match framed.next().await {
        Some(Ok(ProtocolMessage::ChallengeResponse(ChallengeResponseBody { challenge, .. }))) => challenge,
        Some(Ok(other)) => {
            return Err(SopmqError::ProtocolViolation(format!(
                "expected ChallengeResponse, got {}",
                other.variant_name()
            )))
        }
        Some(Err(e)) => return Err(e),
        None => return Err(SopmqError::ConnectionClosed),
    };

    framed
        .send(ProtocolMessage::AnswerChallenge(AnswerChallengeBody {
            identifier: Identifier::request(2),
            uname_hash: auth::uname_hash(node_username),
            challenge_response: auth::challenge_response(node_password, &challenge),
        }))
        .await
        .map_err(|e| SopmqError::Network(e.to_string()))?;

    match framed.next().await {
        Some(Ok(ProtocolMessage::AuthAck(AuthAckBody { authorized: true, .. }))) => Ok(()),
        Some(Ok(ProtocolMessage::AuthAck(AuthAckBody { authorized: false, .. }))) => {
            Err(SopmqError::AuthFailure)
        }
        Some(Ok(other)) => Err(SopmqError::ProtocolViolation(format!(
            "expected AuthAck, got {}",
            other.variant_name()
        ))),
        Some(Err(e)) => Err(e),
        None => Err(SopmqError::ConnectionClosed),
    }
}

async fn run_peer_connection(
    mut framed: Framed<TcpStream, SopmqCodec>,
    mut commands: mpsc::UnboundedReceiver<PendingSend>,
) {
    let mut dispatcher = CorrelationDispatcher::new();
    let mut next_id: CorrelationId = 1;

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id;
                next_id = next_id.wrapping_add(1).max(1);
                let msg = (cmd.build)(id);
                let rx = dispatcher.register(id, cmd.expected_variant);
                if let Err(e) = framed.send(msg).await {
                    let _ = cmd.reply_to.send(Err(SopmqError::Network(e.to_string())));
                    break;
                }
                tokio::spawn(async move {
                    match rx.await {
                        Ok(msg) => { let _ = cmd.reply_to.send(Ok(msg)); }
                        Err(_) => { let _ = cmd.reply_to.send(Err(SopmqError::Network("node_unreachable".into()))); }
                    }
                });
            }
            frame = framed.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if let DispatchOutcome::Unhandled(variant) = dispatcher.dispatch(msg) {
                            tracing::warn!(variant, "unhandled frame on peer connection");
                        }
                    }
                    _ => break,
                }
            }
        }
    }

    dispatcher.teardown();
}

/// Holds at most one active connection per peer endpoint, reconnecting
/// lazily the next time that peer is used after a drop. Every fresh
/// connection authenticates as `ChallengeRequester::Node` using the
/// cluster's shared peer credential before it's handed out for RPC use.
pub struct PeerConnectionPool {
    connections: Mutex<HashMap<String, PeerConnectionHandle>>,
    max_message_size: u32,
    node_username: String,
    node_password: String,
}

impl PeerConnectionPool {
    pub fn new(
        max_message_size: u32,
        node_username: impl Into<String>,
        node_password: impl Into<String>,
    ) -> PeerConnectionPool {
        PeerConnectionPool {
            connections: Mutex::new(HashMap::new()),
            max_message_size,
            node_username: node_username.into(),
            node_password: node_password.into(),
        }
    }

    async fn handle_for(&self, endpoint: &Endpoint) -> Result<PeerConnectionHandle, SopmqError> {
        let key = endpoint.socket_addr_string();
        let mut connections = self.connections.lock().await;
        if let Some(handle) = connections.get(&key) {
            return Ok(handle.clone());
        }

        let stream = TcpStream::connect(&key)
            .await
            .map_err(|e| SopmqError::Network(format!("connecting to {key}: {e}")))?;
        let mut framed = Framed::new(stream, SopmqCodec::new(self.max_message_size));
        authenticate_peer_connection(&mut framed, &self.node_username, &self.node_password).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_peer_connection(framed, rx));

        let handle = PeerConnectionHandle { commands: tx };
        connections.insert(key, handle.clone());
        Ok(handle)
    }

    /// Drops the pooled connection for `endpoint`, if any, so the next use
    /// reconnects from scratch.
    pub async fn evict(&self, endpoint: &Endpoint) {
        self.connections.lock().await.remove(&endpoint.socket_addr_string());
    }
}

/// A `ReplicaClient` that proxies to a remote node over the pooled
/// connection for its endpoint.
pub struct RemoteReplicaClient {
    pool: Arc<PeerConnectionPool>,
    endpoint: Endpoint,
    replica_node_ids: [u64; REPLICA_COUNT],
}

impl RemoteReplicaClient {
    pub fn new(
        pool: Arc<PeerConnectionPool>,
        endpoint: Endpoint,
        replica_node_ids: [u64; REPLICA_COUNT],
    ) -> RemoteReplicaClient {
        RemoteReplicaClient {
            pool,
            endpoint,
            replica_node_ids,
        }
    }
}

#[async_trait]
impl ReplicaClient for RemoteReplicaClient {
    async fn propose(
        &self,
        queue_id: &str,
        payload: Vec<u8>,
        origin_correlation: CorrelationId,
        ttl_secs: u32,
    ) -> Result<ProxyOutcome, SopmqError> {
        let handle = self.pool.handle_for(&self.endpoint).await?;
        let queue_id_owned = queue_id.to_string();
        let reply = handle
            .request("ProxyPublishResponse", move |id| {
                ProtocolMessage::ProxyPublish(ProxyPublishBody {
                    identifier: Identifier::request(id),
                    queue_id: queue_id_owned,
                    origin_correlation,
                    phase: ProxyPublishPhase::Tentative {
                        payload,
                        ttl_secs,
                    },
                })
            })
            .await?;

        match reply {
            ProtocolMessage::ProxyPublishResponse(ProxyPublishResponseBody {
                status,
                proposed_clock,
                ..
            }) => Ok(match status {
                ProxyStatus::Queued => ProxyOutcome::Queued {
                    proposed_clock: proposed_clock
                        .ok_or_else(|| SopmqError::ProtocolViolation("queued without a clock".into()))?,
                },
                ProxyStatus::Rejected => ProxyOutcome::Rejected,
                ProxyStatus::Overloaded => ProxyOutcome::Overloaded,
                ProxyStatus::ClockError => ProxyOutcome::ClockError,
            }),
            other => Err(SopmqError::ProtocolViolation(format!(
                "expected ProxyPublishResponse, got {}",
                other.variant_name()
            ))),
        }
    }

    async fn commit(&self, queue_id: &str, final_clock: &VectorClock) -> Result<(), SopmqError> {
        let handle = self.pool.handle_for(&self.endpoint).await?;
        let queue_id_owned = queue_id.to_string();
        let final_clock = final_clock.clone();
        handle
            .request("ProxyPublishResponse", move |id| {
                ProtocolMessage::ProxyPublish(ProxyPublishBody {
                    identifier: Identifier::request(id),
                    queue_id: queue_id_owned,
                    origin_correlation: 0,
                    phase: ProxyPublishPhase::Commit { final_clock },
                })
            })
            .await?;
        let _ = self.replica_node_ids;
        Ok(())
    }
}
