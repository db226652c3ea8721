//! Routes inbound frames to the handler that's waiting for them.
//!
//! A session owns exactly one dispatcher and drives it from its single
//! receive task, so no internal locking is needed. Pending handlers are
//! one-shot: the first matching frame consumes the registration. Default
//! handlers are standing and keep firing for every unsolicited frame of
//! their variant until cleared.

use crate::message::ProtocolMessage;
use sopmq_types::CorrelationId;
use std::collections::HashMap;
use tokio::sync::oneshot;

type PendingKey = (CorrelationId, &'static str);
type DefaultHandler = Box<dyn Fn(ProtocolMessage) + Send>;

/// What happened to a frame handed to `dispatch`.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Delivered to a one-shot handler registered for this id and variant.
    Delivered,
    /// No pending handler matched; delivered to the variant's default.
    DeliveredToDefault,
    /// Neither a pending handler nor a default existed. The caller should
    /// treat this as a protocol violation and tear the session down.
    Unhandled(&'static str),
}

#[derive(Default)]
pub struct CorrelationDispatcher {
    pending: HashMap<PendingKey, oneshot::Sender<ProtocolMessage>>,
    defaults: HashMap<&'static str, DefaultHandler>,
}

impl CorrelationDispatcher {
    pub fn new() -> CorrelationDispatcher {
        CorrelationDispatcher::default()
    }

    /// Registers a one-shot handler for a reply to `id` of variant
    /// `variant`. The returned receiver resolves when a matching frame
    /// arrives, or errors if the dispatcher is torn down first.
    pub fn register(
        &mut self,
        id: CorrelationId,
        variant: &'static str,
    ) -> oneshot::Receiver<ProtocolMessage> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert((id, variant), tx);
        rx
    }

    /// Installs a standing handler for unsolicited frames of `variant`.
    pub fn register_default(&mut self, variant: &'static str, handler: DefaultHandler) {
        self.defaults.insert(variant, handler);
    }

    /// Clears a previously registered default handler for `variant`.
    pub fn clear_default(&mut self, variant: &'static str) {
        self.defaults.remove(variant);
    }

    /// Delivers `msg` to whichever handler matches its `(in_reply_to,
    /// variant)` pair, falling back to the variant's default.
    pub fn dispatch(&mut self, msg: ProtocolMessage) -> DispatchOutcome {
        let variant = msg.variant_name();
        let in_reply_to = msg.identifier().in_reply_to;

        if in_reply_to != 0 {
            if let Some(tx) = self.pending.remove(&(in_reply_to, variant)) {
                let _ = tx.send(msg);
                return DispatchOutcome::Delivered;
            }
        }

        if let Some(handler) = self.defaults.get(variant) {
            handler(msg);
            return DispatchOutcome::DeliveredToDefault;
        }

        DispatchOutcome::Unhandled(variant)
    }

    /// Drops every pending handler, so their receivers observe a closed
    /// channel. Called on session teardown; callers map the resulting
    /// `RecvError` to `SopmqError::ConnectionClosed`.
    pub fn teardown(&mut self) {
        self.pending.clear();
        self.defaults.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
