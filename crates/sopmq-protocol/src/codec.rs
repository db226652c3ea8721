//! Frames look like `[u8 type_tag][u32 length][bytes payload]`, all
//! integers big-endian. `length` bounds the payload only, not the 5-byte
//! header. A declared length over `max_message_size` is a fatal,
//! connection-ending error — the codec does not attempt to skip or resync.

use crate::message::headers::*;
use crate::message::*;
use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};
use sopmq_types::SopmqError;
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 1 + 4;

/// Default cap on a frame's payload length, matching spec §6's 8 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 8 * 1024 * 1024;

pub struct SopmqCodec {
    max_message_size: u32,
}

impl SopmqCodec {
    pub fn new(max_message_size: u32) -> SopmqCodec {
        SopmqCodec { max_message_size }
    }
}

impl Default for SopmqCodec {
    fn default() -> SopmqCodec {
        SopmqCodec::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

fn encode_body(msg: &ProtocolMessage) -> Result<Vec<u8>, SopmqError> {
    let bytes = match msg {
        ProtocolMessage::GetChallenge(b) => bincode::serialize(b),
        ProtocolMessage::ChallengeResponse(b) => bincode::serialize(b),
        ProtocolMessage::AnswerChallenge(b) => bincode::serialize(b),
        ProtocolMessage::AuthAck(b) => bincode::serialize(b),
        ProtocolMessage::Publish(b) => bincode::serialize(b),
        ProtocolMessage::PublishResponse(b) => bincode::serialize(b),
        ProtocolMessage::ProxyPublish(b) => bincode::serialize(b),
        ProtocolMessage::ProxyPublishResponse(b) => bincode::serialize(b),
        ProtocolMessage::ConsumeFromQueue(b) => bincode::serialize(b),
        ProtocolMessage::ConsumeResponse(b) => bincode::serialize(b),
        ProtocolMessage::Gossip(b) => bincode::serialize(b),
        ProtocolMessage::GossipNodeData(b) => bincode::serialize(b),
        ProtocolMessage::NodeClock(b) => bincode::serialize(b),
        ProtocolMessage::VectorClock(b) => bincode::serialize(b),
    };
    bytes.map_err(|e| SopmqError::ProtocolViolation(format!("encode failure: {e}")))
}

fn decode_body(type_tag: u8, payload: &[u8]) -> Result<ProtocolMessage, SopmqError> {
    let bad = |e: bincode::Error| SopmqError::ProtocolViolation(format!("decode failure: {e}"));
    Ok(match type_tag {
        GET_CHALLENGE => ProtocolMessage::GetChallenge(bincode::deserialize(payload).map_err(bad)?),
        CHALLENGE_RESPONSE => {
            ProtocolMessage::ChallengeResponse(bincode::deserialize(payload).map_err(bad)?)
        }
        ANSWER_CHALLENGE => {
            ProtocolMessage::AnswerChallenge(bincode::deserialize(payload).map_err(bad)?)
        }
        AUTH_ACK => ProtocolMessage::AuthAck(bincode::deserialize(payload).map_err(bad)?),
        PUBLISH => ProtocolMessage::Publish(bincode::deserialize(payload).map_err(bad)?),
        PUBLISH_RESPONSE => {
            ProtocolMessage::PublishResponse(bincode::deserialize(payload).map_err(bad)?)
        }
        PROXY_PUBLISH => ProtocolMessage::ProxyPublish(bincode::deserialize(payload).map_err(bad)?),
        PROXY_PUBLISH_RESPONSE => {
            ProtocolMessage::ProxyPublishResponse(bincode::deserialize(payload).map_err(bad)?)
        }
        CONSUME_FROM_QUEUE => {
            ProtocolMessage::ConsumeFromQueue(bincode::deserialize(payload).map_err(bad)?)
        }
        CONSUME_RESPONSE => {
            ProtocolMessage::ConsumeResponse(bincode::deserialize(payload).map_err(bad)?)
        }
        GOSSIP => ProtocolMessage::Gossip(bincode::deserialize(payload).map_err(bad)?),
        GOSSIP_NODE_DATA => {
            ProtocolMessage::GossipNodeData(bincode::deserialize(payload).map_err(bad)?)
        }
        NODE_CLOCK => ProtocolMessage::NodeClock(bincode::deserialize(payload).map_err(bad)?),
        VECTOR_CLOCK => ProtocolMessage::VectorClock(bincode::deserialize(payload).map_err(bad)?),
        other => {
            return Err(SopmqError::ProtocolViolation(format!(
                "unknown type_tag {other}"
            )))
        }
    })
}

impl Encoder<ProtocolMessage> for SopmqCodec {
    type Error = SopmqError;

    fn encode(&mut self, msg: ProtocolMessage, dst: &mut BytesMut) -> Result<(), SopmqError> {
        let type_tag = msg.type_tag();
        let body = encode_body(&msg)?;
        if body.len() as u64 > self.max_message_size as u64 {
            return Err(SopmqError::OversizeMessage {
                declared: body.len() as u32,
                max: self.max_message_size,
            });
        }
        dst.reserve(HEADER_LEN + body.len());
        dst.put_u8(type_tag);
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Decoder for SopmqCodec {
    type Item = ProtocolMessage;
    type Error = SopmqError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ProtocolMessage>, SopmqError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let type_tag = src[0];
        let length = BigEndian::read_u32(&src[1..5]);

        if length > self.max_message_size {
            return Err(SopmqError::OversizeMessage {
                declared: length,
                max: self.max_message_size,
            });
        }

        let frame_len = HEADER_LEN + length as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length as usize);
        decode_body(type_tag, &payload).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sopmq_types::Identifier;

    fn sample_messages() -> Vec<ProtocolMessage> {
        let id = Identifier::request(42);
        vec![
            ProtocolMessage::GetChallenge(GetChallengeBody {
                identifier: id,
                requester: ChallengeRequester::Client,
            }),
            ProtocolMessage::ChallengeResponse(ChallengeResponseBody {
                identifier: Identifier::reply(43, 42),
                challenge: vec![1, 2, 3, 4],
            }),
            ProtocolMessage::Publish(PublishBody {
                identifier: id,
                queue_id: "orders".to_string(),
                payload: vec![0u8; 256],
            }),
            ProtocolMessage::PublishResponse(PublishResponseBody {
                identifier: id,
                outcome: PublishOutcome::Unavailable,
            }),
        ]
    }

    #[test]
    fn round_trips_each_sample_message() {
        for msg in sample_messages() {
            let mut codec = SopmqCodec::default();
            let mut buf = BytesMut::new();
            codec.encode(msg.clone(), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().expect("one frame");
            assert_eq!(decoded, msg);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn partial_frame_returns_none_until_complete() {
        let mut codec = SopmqCodec::default();
        let msg = sample_messages().remove(2);
        let mut full = BytesMut::new();
        codec.encode(msg.clone(), &mut full).unwrap();

        let mut partial = BytesMut::new();
        partial.extend_from_slice(&full[..HEADER_LEN + 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[HEADER_LEN + 2..]);
        let decoded = codec.decode(&mut partial).unwrap().expect("now complete");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn oversize_declared_length_is_rejected() {
        let mut codec = SopmqCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_u8(PUBLISH);
        buf.put_u32(1024);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, SopmqError::OversizeMessage { .. }));
    }

    #[test]
    fn encoding_over_cap_is_rejected() {
        let mut codec = SopmqCodec::new(8);
        let msg = ProtocolMessage::Publish(PublishBody {
            identifier: Identifier::request(1),
            queue_id: "orders".to_string(),
            payload: vec![0u8; 64],
        });
        let mut buf = BytesMut::new();
        let err = codec.encode(msg, &mut buf).unwrap_err();
        assert!(matches!(err, SopmqError::OversizeMessage { .. }));
    }

    proptest::proptest! {
        #[test]
        fn publish_round_trips_for_arbitrary_payloads(
            queue_id in "[a-z]{1,16}",
            payload in proptest::collection::vec(proptest::num::u8::ANY, 0..512),
        ) {
            let msg = ProtocolMessage::Publish(PublishBody {
                identifier: Identifier::request(1),
                queue_id,
                payload,
            });
            let mut codec = SopmqCodec::default();
            let mut buf = BytesMut::new();
            codec.encode(msg.clone(), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().expect("one frame");
            proptest::prop_assert_eq!(decoded, msg);
            proptest::prop_assert!(buf.is_empty());
        }
    }
}
