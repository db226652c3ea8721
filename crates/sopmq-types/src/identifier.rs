use serde::{Deserialize, Serialize};

/// Per-connection correlation id, assigned by whichever side originates a
/// request. Responses echo the originating id back in `in_reply_to`.
pub type CorrelationId = u32;

/// Carried on every message on the wire. A response sets `in_reply_to` to
/// the request's `id`; unsolicited messages set it to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub id: CorrelationId,
    pub in_reply_to: CorrelationId,
}

impl Identifier {
    /// A fresh identifier for a request this side originates.
    pub fn request(id: CorrelationId) -> Identifier {
        Identifier { id, in_reply_to: 0 }
    }

    /// An identifier for a reply to `request_id`.
    pub fn reply(id: CorrelationId, request_id: CorrelationId) -> Identifier {
        Identifier {
            id,
            in_reply_to: request_id,
        }
    }

    /// Whether this identifier is unsolicited (not a reply to anything).
    pub fn is_unsolicited(&self) -> bool {
        self.in_reply_to == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_has_zero_in_reply_to() {
        let id = Identifier::request(5);
        assert_eq!(id.id, 5);
        assert_eq!(id.in_reply_to, 0);
        assert!(id.is_unsolicited());
    }

    #[test]
    fn reply_carries_request_id() {
        let id = Identifier::reply(9, 5);
        assert_eq!(id.id, 9);
        assert_eq!(id.in_reply_to, 5);
        assert!(!id.is_unsolicited());
    }
}
