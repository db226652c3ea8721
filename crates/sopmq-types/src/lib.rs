//! Shared value types for the sopmq cluster coordination core.
//!
//! This crate has no network or storage dependencies; it's the foundation
//! that `sopmq-protocol`, `sopmq-client`, and `sopmq-node` all build on.

pub mod endpoint;
pub mod error;
pub mod hash;
pub mod identifier;
pub mod vector_clock;

pub use endpoint::{Endpoint, EndpointProto};
pub use error::SopmqError;
pub use identifier::{CorrelationId, Identifier};
pub use vector_clock::{ClockOrdering, NodeClock, VectorClock};

/// Replica-set cardinality (N). Fixed for this protocol version.
pub const REPLICA_COUNT: usize = 3;

/// Quorum size (W) required to commit a publish.
pub const QUORUM_SIZE: usize = 2;
