//! Client-side half of the session state machine: drives the
//! challenge/response handshake to completion before any other message is
//! sent.

use crate::connection::ClientHandle;
use sopmq_protocol::auth;
use sopmq_protocol::message::{
    AnswerChallengeBody, ChallengeRequester, ChallengeResponseBody, GetChallengeBody,
};
use sopmq_protocol::ProtocolMessage;
use sopmq_types::{Identifier, SopmqError};

/// Runs the auth handshake over an already-connected handle. On success
/// the connection is ready for `Publish`/`ConsumeFromQueue` traffic; on
/// `Ok(false)` the server has already closed the connection.
pub async fn authenticate(
    handle: &ClientHandle,
    username: &str,
    password: &str,
) -> Result<bool, SopmqError> {
    let challenge_reply = handle
        .request("ChallengeResponse", |id| {
            ProtocolMessage::GetChallenge(GetChallengeBody {
                identifier: Identifier::request(id),
                requester: ChallengeRequester::Client,
            })
        })
        .await?;

    let challenge = match challenge_reply {
        ProtocolMessage::ChallengeResponse(ChallengeResponseBody { challenge, .. }) => challenge,
        other => {
            return Err(SopmqError::ProtocolViolation(format!(
                "expected ChallengeResponse, got {}",
                other.variant_name()
            )))
        }
    };

    let uname_hash = auth::uname_hash(username);
    let response = auth::challenge_response(password, &challenge);

    let ack_reply = handle
        .request("AuthAck", move |id| {
            ProtocolMessage::AnswerChallenge(AnswerChallengeBody {
                identifier: Identifier::request(id),
                uname_hash,
                challenge_response: response,
            })
        })
        .await?;

    match ack_reply {
        ProtocolMessage::AuthAck(ack) => Ok(ack.authorized),
        other => Err(SopmqError::ProtocolViolation(format!(
            "expected AuthAck, got {}",
            other.variant_name()
        ))),
    }
}
