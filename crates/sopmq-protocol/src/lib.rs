//! Wire protocol for sopmq: message types, framing codec, correlation
//! dispatch, and challenge/response auth hashing.

pub mod auth;
pub mod codec;
pub mod dispatcher;
pub mod message;

pub use codec::{SopmqCodec, DEFAULT_MAX_MESSAGE_SIZE};
pub use dispatcher::{CorrelationDispatcher, DispatchOutcome};
pub use message::ProtocolMessage;
