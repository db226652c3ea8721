//! Storage is a blind sink: the coordinator writes tentative rows, commits
//! them once quorum is reached, and reads them back. This module doesn't
//! attempt to model a real row store — `MemoryStorage` below exists for
//! tests and the bench path, the same role the reference system's
//! Cassandra-backed adapter plays at a real cluster.

use async_trait::async_trait;
use sopmq_types::{SopmqError, VectorClock};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub stamp: VectorClock,
    pub payload: Vec<u8>,
}

/// The interface the quorum coordinator consumes. A real implementation
/// backs this with a persistent column/row store; this repository only
/// ships the in-memory one.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Writes a not-yet-committed row, expiring after `ttl` if it's never
    /// committed (see the open question in the error-handling design: no
    /// explicit abort message is sent, rows just expire).
    async fn tentative_accept(
        &self,
        queue_id: &str,
        message_body: &[u8],
        proposed_clock: &VectorClock,
        ttl: Duration,
    ) -> Result<(), SopmqError>;

    /// Promotes a tentative row to committed, replacing its clock with the
    /// coordinator's merged `final_clock`. Returns the committed stamp.
    async fn commit(
        &self,
        queue_id: &str,
        proposed_clock: &VectorClock,
        final_clock: &VectorClock,
    ) -> Result<VectorClock, SopmqError>;

    /// Reads up to `limit` committed messages for `queue_id`, ordered by
    /// stamp, starting strictly after `from_stamp` (or from the start if
    /// `None`).
    async fn read_range(
        &self,
        queue_id: &str,
        from_stamp: Option<&VectorClock>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, SopmqError>;
}

struct TentativeRow {
    payload: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
struct QueueState {
    tentative: HashMap<[u8; 24], TentativeRow>,
    committed: Vec<StoredMessage>,
}

/// An in-memory `StorageAdapter`, sufficient for tests and the embedded
/// bench path. Not durable across process restarts.
#[derive(Default)]
pub struct MemoryStorage {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    fn clock_key(clock: &VectorClock) -> [u8; 24] {
        let mut key = [0u8; 24];
        for (i, node) in clock.nodes().iter().enumerate() {
            key[i * 8..i * 8 + 8].copy_from_slice(&node.counter.to_be_bytes());
        }
        key
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn tentative_accept(
        &self,
        queue_id: &str,
        message_body: &[u8],
        proposed_clock: &VectorClock,
        ttl: Duration,
    ) -> Result<(), SopmqError> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue_id.to_string()).or_default();
        state.tentative.insert(
            Self::clock_key(proposed_clock),
            TentativeRow {
                payload: message_body.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn commit(
        &self,
        queue_id: &str,
        proposed_clock: &VectorClock,
        final_clock: &VectorClock,
    ) -> Result<VectorClock, SopmqError> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue_id.to_string()).or_default();

        let key = Self::clock_key(proposed_clock);
        let row = state.tentative.remove(&key).ok_or_else(|| {
            SopmqError::ProtocolViolation(format!(
                "no tentative row for queue '{queue_id}' at the proposed clock"
            ))
        })?;

        if row.expires_at < Instant::now() {
            return Err(SopmqError::ProtocolViolation(
                "tentative row expired before commit".to_string(),
            ));
        }

        state.committed.push(StoredMessage {
            stamp: final_clock.clone(),
            payload: row.payload,
        });

        Ok(final_clock.clone())
    }

    async fn read_range(
        &self,
        queue_id: &str,
        from_stamp: Option<&VectorClock>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, SopmqError> {
        let queues = self.queues.lock().unwrap();
        let Some(state) = queues.get(queue_id) else {
            return Ok(Vec::new());
        };

        let mut messages = state.committed.clone();
        if let Some(from) = from_stamp {
            let mut after = false;
            messages.retain(|m| {
                if after {
                    return true;
                }
                if m.stamp == *from {
                    after = true;
                }
                false
            });
        }
        messages.truncate(limit);
        Ok(messages)
    }
}
