//! High-level client combining connection, auth, and the request methods
//! an application actually calls.

use crate::connection::{self, ClientHandle};
use crate::session;
use sopmq_protocol::message::{ConsumeFromQueueBody, ConsumeResponseBody, PublishBody, PublishOutcome, PublishResponseBody, QueuedMessage};
use sopmq_protocol::{codec::DEFAULT_MAX_MESSAGE_SIZE, ProtocolMessage};
use sopmq_types::{Identifier, SopmqError, VectorClock};

pub struct Client {
    handle: ClientHandle,
}

impl Client {
    /// Connects to `addr` and runs the auth handshake. Returns
    /// `SopmqError::AuthFailure` if the server rejects the credentials.
    pub async fn connect(addr: &str, username: &str, password: &str) -> Result<Client, SopmqError> {
        Self::connect_with_frame_cap(addr, username, password, DEFAULT_MAX_MESSAGE_SIZE).await
    }

    pub async fn connect_with_frame_cap(
        addr: &str,
        username: &str,
        password: &str,
        max_message_size: u32,
    ) -> Result<Client, SopmqError> {
        let handle = connection::connect(addr, max_message_size).await?;
        let authorized = session::authenticate(&handle, username, password).await?;
        if !authorized {
            return Err(SopmqError::AuthFailure);
        }
        Ok(Client { handle })
    }

    /// Publishes `payload` to `queue_id`, returning the committed vector
    /// clock stamp on success.
    pub async fn publish(&self, queue_id: &str, payload: Vec<u8>) -> Result<VectorClock, SopmqError> {
        let queue_id = queue_id.to_string();
        let reply = self
            .handle
            .request("PublishResponse", move |id| {
                ProtocolMessage::Publish(PublishBody {
                    identifier: Identifier::request(id),
                    queue_id,
                    payload,
                })
            })
            .await?;

        match reply {
            ProtocolMessage::PublishResponse(PublishResponseBody { outcome, .. }) => match outcome {
                PublishOutcome::Ok { stamp } => Ok(stamp),
                PublishOutcome::Unavailable => Err(SopmqError::Unavailable(
                    "quorum could not be reached".to_string(),
                )),
            },
            other => Err(SopmqError::ProtocolViolation(format!(
                "expected PublishResponse, got {}",
                other.variant_name()
            ))),
        }
    }

    /// Reads up to `limit` committed messages from `queue_id` starting
    /// after `from_stamp` (or from the beginning if `None`).
    pub async fn consume(
        &self,
        queue_id: &str,
        from_stamp: Option<VectorClock>,
        limit: u32,
    ) -> Result<Vec<QueuedMessage>, SopmqError> {
        let queue_id = queue_id.to_string();
        let reply = self
            .handle
            .request("ConsumeResponse", move |id| {
                ProtocolMessage::ConsumeFromQueue(ConsumeFromQueueBody {
                    identifier: Identifier::request(id),
                    queue_id,
                    from_stamp,
                    limit,
                })
            })
            .await?;

        match reply {
            ProtocolMessage::ConsumeResponse(ConsumeResponseBody { messages, .. }) => Ok(messages),
            other => Err(SopmqError::ProtocolViolation(format!(
                "expected ConsumeResponse, got {}",
                other.variant_name()
            ))),
        }
    }
}
