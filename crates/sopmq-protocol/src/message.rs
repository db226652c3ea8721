//! The closed union of message variants exchanged between clients, nodes,
//! and node-to-node RPC links. Every variant carries an `Identifier` so a
//! reply can be correlated back to its request.
//!
//! All numbers are framed big-endian (see `codec`). Payloads themselves are
//! opaque to the framing layer: they're serialized with `bincode`, which is
//! this project's stand-in for the original's generated wire codec.

use serde::{Deserialize, Serialize};
use sopmq_types::{CorrelationId, Identifier, NodeClock, VectorClock};

pub mod headers {
    pub const GET_CHALLENGE: u8 = 1;
    pub const CHALLENGE_RESPONSE: u8 = 2;
    pub const ANSWER_CHALLENGE: u8 = 3;
    pub const AUTH_ACK: u8 = 4;
    pub const PUBLISH: u8 = 5;
    pub const PUBLISH_RESPONSE: u8 = 6;
    pub const PROXY_PUBLISH: u8 = 7;
    pub const PROXY_PUBLISH_RESPONSE: u8 = 8;
    pub const CONSUME_FROM_QUEUE: u8 = 9;
    pub const CONSUME_RESPONSE: u8 = 10;
    pub const GOSSIP: u8 = 11;
    pub const GOSSIP_NODE_DATA: u8 = 12;
    pub const NODE_CLOCK: u8 = 13;
    pub const VECTOR_CLOCK: u8 = 14;
}

use self::headers::*;

/// Who's asking for a challenge. Node-to-node links authenticate the same
/// way client connections do, just against the peer credential instead of
/// a user's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeRequester {
    Client,
    Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetChallengeBody {
    pub identifier: Identifier,
    pub requester: ChallengeRequester,
}

/// Server's reply to `GetChallenge`: a fresh random nonce, stored on the
/// session until the client answers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResponseBody {
    pub identifier: Identifier,
    pub challenge: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerChallengeBody {
    pub identifier: Identifier,
    pub uname_hash: String,
    pub challenge_response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAckBody {
    pub identifier: Identifier,
    pub authorized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishBody {
    pub identifier: Identifier,
    pub queue_id: String,
    pub payload: Vec<u8>,
}

/// The client-visible result of a publish. `Unavailable` carries no detail
/// beyond the fact that quorum could not be reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PublishOutcome {
    Ok { stamp: VectorClock },
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResponseBody {
    pub identifier: Identifier,
    pub outcome: PublishOutcome,
}

/// `ProxyPublish` is sent twice per replica across a publish's lifetime:
/// once to propose a tentative row, once (only to replicas that answered
/// the first round) to commit it with the coordinator's merged clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProxyPublishPhase {
    Tentative { payload: Vec<u8>, ttl_secs: u32 },
    Commit { final_clock: VectorClock },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyPublishBody {
    pub identifier: Identifier,
    pub queue_id: String,
    pub origin_correlation: CorrelationId,
    pub phase: ProxyPublishPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyStatus {
    Queued,
    Rejected,
    Overloaded,
    ClockError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyPublishResponseBody {
    pub identifier: Identifier,
    pub status: ProxyStatus,
    pub proposed_clock: Option<VectorClock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumeFromQueueBody {
    pub identifier: Identifier,
    pub queue_id: String,
    pub from_stamp: Option<VectorClock>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub stamp: VectorClock,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumeResponseBody {
    pub identifier: Identifier,
    pub messages: Vec<QueuedMessage>,
}

/// One ring entry as carried by gossip. Not a message in its own right;
/// `GossipBody` batches these and `GossipNodeDataBody` carries exactly one
/// when a single node announces itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipNodeEntry {
    pub node_id: u64,
    pub range_start: u128,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipBody {
    pub identifier: Identifier,
    pub nodes: Vec<GossipNodeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipNodeDataBody {
    pub identifier: Identifier,
    pub node: GossipNodeEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeClockBody {
    pub identifier: Identifier,
    pub clock: NodeClock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClockBody {
    pub identifier: Identifier,
    pub clock: VectorClock,
}

/// One frame's worth of protocol traffic. `type_tag` and `identifier` are
/// cheap to read off any variant without matching on its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    GetChallenge(GetChallengeBody),
    ChallengeResponse(ChallengeResponseBody),
    AnswerChallenge(AnswerChallengeBody),
    AuthAck(AuthAckBody),
    Publish(PublishBody),
    PublishResponse(PublishResponseBody),
    ProxyPublish(ProxyPublishBody),
    ProxyPublishResponse(ProxyPublishResponseBody),
    ConsumeFromQueue(ConsumeFromQueueBody),
    ConsumeResponse(ConsumeResponseBody),
    Gossip(GossipBody),
    GossipNodeData(GossipNodeDataBody),
    NodeClock(NodeClockBody),
    VectorClock(VectorClockBody),
}

impl ProtocolMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            ProtocolMessage::GetChallenge(_) => GET_CHALLENGE,
            ProtocolMessage::ChallengeResponse(_) => CHALLENGE_RESPONSE,
            ProtocolMessage::AnswerChallenge(_) => ANSWER_CHALLENGE,
            ProtocolMessage::AuthAck(_) => AUTH_ACK,
            ProtocolMessage::Publish(_) => PUBLISH,
            ProtocolMessage::PublishResponse(_) => PUBLISH_RESPONSE,
            ProtocolMessage::ProxyPublish(_) => PROXY_PUBLISH,
            ProtocolMessage::ProxyPublishResponse(_) => PROXY_PUBLISH_RESPONSE,
            ProtocolMessage::ConsumeFromQueue(_) => CONSUME_FROM_QUEUE,
            ProtocolMessage::ConsumeResponse(_) => CONSUME_RESPONSE,
            ProtocolMessage::Gossip(_) => GOSSIP,
            ProtocolMessage::GossipNodeData(_) => GOSSIP_NODE_DATA,
            ProtocolMessage::NodeClock(_) => NODE_CLOCK,
            ProtocolMessage::VectorClock(_) => VECTOR_CLOCK,
        }
    }

    pub fn identifier(&self) -> Identifier {
        match self {
            ProtocolMessage::GetChallenge(b) => b.identifier,
            ProtocolMessage::ChallengeResponse(b) => b.identifier,
            ProtocolMessage::AnswerChallenge(b) => b.identifier,
            ProtocolMessage::AuthAck(b) => b.identifier,
            ProtocolMessage::Publish(b) => b.identifier,
            ProtocolMessage::PublishResponse(b) => b.identifier,
            ProtocolMessage::ProxyPublish(b) => b.identifier,
            ProtocolMessage::ProxyPublishResponse(b) => b.identifier,
            ProtocolMessage::ConsumeFromQueue(b) => b.identifier,
            ProtocolMessage::ConsumeResponse(b) => b.identifier,
            ProtocolMessage::Gossip(b) => b.identifier,
            ProtocolMessage::GossipNodeData(b) => b.identifier,
            ProtocolMessage::NodeClock(b) => b.identifier,
            ProtocolMessage::VectorClock(b) => b.identifier,
        }
    }

    /// The name of this variant, used in protocol-violation log lines and
    /// the dispatcher's unhandled-message hook.
    pub fn variant_name(&self) -> &'static str {
        match self {
            ProtocolMessage::GetChallenge(_) => "GetChallenge",
            ProtocolMessage::ChallengeResponse(_) => "ChallengeResponse",
            ProtocolMessage::AnswerChallenge(_) => "AnswerChallenge",
            ProtocolMessage::AuthAck(_) => "AuthAck",
            ProtocolMessage::Publish(_) => "Publish",
            ProtocolMessage::PublishResponse(_) => "PublishResponse",
            ProtocolMessage::ProxyPublish(_) => "ProxyPublish",
            ProtocolMessage::ProxyPublishResponse(_) => "ProxyPublishResponse",
            ProtocolMessage::ConsumeFromQueue(_) => "ConsumeFromQueue",
            ProtocolMessage::ConsumeResponse(_) => "ConsumeResponse",
            ProtocolMessage::Gossip(_) => "Gossip",
            ProtocolMessage::GossipNodeData(_) => "GossipNodeData",
            ProtocolMessage::NodeClock(_) => "NodeClock",
            ProtocolMessage::VectorClock(_) => "VectorClock",
        }
    }
}
