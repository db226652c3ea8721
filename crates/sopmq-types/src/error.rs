use thiserror::Error;

/// The error kinds named in the cluster coordination core's error design.
///
/// Transport and protocol errors are local to one connection and never
/// propagate to other sessions. Quorum failures are surfaced to the
/// originating client only, as a `PublishResponse`, not as this error type.
#[derive(Debug, Error)]
pub enum SopmqError {
    /// Transport failure. Closes the affected connection and fails all of
    /// its pending dispatcher handlers.
    #[error("network error: {0}")]
    Network(String),

    /// Unexpected message variant received, or malformed framing.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A frame's declared length exceeded `max_message_size`. Treated as a
    /// protocol violation by session-layer callers, but kept distinct so
    /// it can be logged and metered separately.
    #[error("oversize message: {declared} bytes exceeds max of {max}")]
    OversizeMessage { declared: u32, max: u32 },

    /// The ring could not produce N distinct replicas, or quorum was lost
    /// mid-operation.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Two vector clocks were compared or merged but did not share an
    /// identical set of node ids.
    #[error("comparison error: vector clocks have mismatched node id sets")]
    ComparisonError,

    /// A `sopmq://` endpoint URI could not be parsed.
    #[error("uri parse error: {0}")]
    UriParse(String),

    /// An endpoint URI named a scheme other than `sopmq`.
    #[error("invalid protocol scheme: {0}")]
    InvalidProtocol(String),

    /// Challenge/response authentication failed.
    #[error("authentication failed")]
    AuthFailure,

    /// The connection was closed (locally or by the peer) while a handler
    /// was still pending a reply.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, SopmqError>;
