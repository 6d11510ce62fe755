//! Chat message envelope and delivery status

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, PeerIdentity, Ttl};

// ----------------------------------------------------------------------------
// Message Kind
// ----------------------------------------------------------------------------

/// What a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// User text
    Data,
    /// Read receipt for the message with the same id
    ReadAck,
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// Immutable chat message as it travels over the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: PeerIdentity,
    pub receiver: PeerIdentity,
    pub text: String,
    pub kind: MessageKind,
    /// Remaining relay budget, absent on messages from peers that do not bound relays
    pub ttl: Option<Ttl>,
    /// Number of relays this copy has passed through
    pub hop_count: Option<u8>,
}

impl Message {
    /// Create a new data message originating on this device
    pub fn data(
        id: MessageId,
        sender: PeerIdentity,
        receiver: PeerIdentity,
        text: String,
        ttl: Ttl,
    ) -> Self {
        Self {
            id,
            sender,
            receiver,
            text,
            kind: MessageKind::Data,
            ttl: Some(ttl),
            hop_count: Some(0),
        }
    }

    /// Create the read receipt `reader` sends back for `original`.
    ///
    /// The receipt reuses the original id; dedup stays unambiguous because the
    /// receipt's sender is the reader.
    pub fn read_ack_for(original: &Message, reader: PeerIdentity, ttl: Ttl) -> Self {
        Self {
            id: original.id,
            sender: reader,
            receiver: original.sender.clone(),
            text: String::new(),
            kind: MessageKind::ReadAck,
            ttl: Some(ttl),
            hop_count: Some(0),
        }
    }

    pub fn is_read_ack(&self) -> bool {
        self.kind == MessageKind::ReadAck
    }

    pub fn is_addressed_to(&self, identity: &PeerIdentity) -> bool {
        &self.receiver == identity
    }

    /// Length of the text in characters, the unit the length bound is expressed in
    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }

    /// The copy to forward one hop further, or `None` once the ttl is spent
    pub fn relayed(&self) -> Option<Message> {
        let ttl = match self.ttl {
            Some(ttl) => Some(ttl.decrement()?),
            None => None,
        };

        Some(Message {
            ttl,
            hop_count: self.hop_count.map(|hops| hops.saturating_add(1)),
            ..self.clone()
        })
    }
}

// ----------------------------------------------------------------------------
// Delivery Status
// ----------------------------------------------------------------------------

/// Delivery state of a message as shown next to it in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Handed to the radio for the receiver's own link, outcome pending
    Sent,
    /// Handed directly to the receiver's own link, or received by this device
    Delivered,
    /// The receiver sent a read receipt
    Read,
    /// Waiting in the retry store for the receiver, possibly flooded meanwhile
    Stored,
    /// Retry window or attempt budget exhausted
    Expired,
    /// Rejected or undeliverable without retry
    Failed,
}

impl MessageStatus {
    /// No further transitions happen from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Read | Self::Expired | Self::Failed)
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Terminal statuses are never left, and a delivered message does not
    /// fall back to merely sent.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        !matches!((self, next), (Self::Delivered, Self::Sent))
    }

    /// Glyph used next to a message in a chat view
    pub fn glyph(&self) -> &'static str {
        match self {
            Self::Sent => "✓",
            Self::Delivered => "✓✓",
            Self::Read => "✓✓*",
            Self::Stored => "⏲",
            Self::Expired => "⚠",
            Self::Failed => "✗",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Stored => "stored",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> PeerIdentity {
        PeerIdentity::new(name).unwrap()
    }

    #[test]
    fn test_relayed_bumps_hops_and_spends_ttl() {
        let message = Message::data(
            MessageId::from_u128(1),
            identity("alice"),
            identity("carol"),
            "hi".into(),
            Ttl::new(2),
        );

        let hop1 = message.relayed().unwrap();
        assert_eq!(hop1.hop_count, Some(1));
        assert_eq!(hop1.ttl, Some(Ttl::new(1)));
        assert_eq!(hop1.id, message.id);
        assert_eq!(hop1.text, message.text);

        assert!(hop1.relayed().is_none());
    }

    #[test]
    fn test_relayed_without_ttl_is_unbounded() {
        let mut message = Message::data(
            MessageId::from_u128(2),
            identity("alice"),
            identity("carol"),
            "hi".into(),
            Ttl::DEFAULT,
        );
        message.ttl = None;
        message.hop_count = None;

        let relayed = message.relayed().unwrap();
        assert_eq!(relayed.ttl, None);
        assert_eq!(relayed.hop_count, None);
    }

    #[test]
    fn test_read_ack_addresses_original_sender() {
        let message = Message::data(
            MessageId::from_u128(3),
            identity("alice"),
            identity("bob"),
            "hello".into(),
            Ttl::DEFAULT,
        );
        let ack = Message::read_ack_for(&message, identity("bob"), Ttl::DEFAULT);

        assert!(ack.is_read_ack());
        assert_eq!(ack.id, message.id);
        assert_eq!(ack.sender, identity("bob"));
        assert_eq!(ack.receiver, identity("alice"));
        assert!(ack.text.is_empty());
    }

    #[test]
    fn test_status_transitions() {
        assert!(MessageStatus::Stored.can_transition_to(MessageStatus::Delivered));
        assert!(MessageStatus::Sent.can_transition_to(MessageStatus::Read));
        assert!(MessageStatus::Delivered.can_transition_to(MessageStatus::Read));
        assert!(!MessageStatus::Delivered.can_transition_to(MessageStatus::Sent));
        assert!(!MessageStatus::Read.can_transition_to(MessageStatus::Expired));
        assert!(!MessageStatus::Expired.can_transition_to(MessageStatus::Delivered));
    }

    #[test]
    fn test_status_rendering() {
        assert_eq!(MessageStatus::Stored.label(), "stored");
        assert_eq!(MessageStatus::Delivered.glyph(), "✓✓");
        assert_eq!(MessageStatus::Expired.to_string(), "expired");
    }
}
