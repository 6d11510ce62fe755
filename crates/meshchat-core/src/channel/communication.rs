//! CSP Channel Communication Protocol Types
//!
//! All inter-task communication flows through these message types. The router
//! task is the only consumer of `Command` and `Event`, and the only producer of
//! `Effect` and `AppEvent`.

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationEntry;
use crate::message::{Message, MessageStatus};
use crate::router::SystemStatus;
use crate::types::{ConnectionHandle, MessageId, PeerIdentity, SendTicket};

// ----------------------------------------------------------------------------
// Command: UI → Router
// ----------------------------------------------------------------------------

/// Requests from the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Send a chat message; the id is chosen by the caller so it can track status
    SendMessage {
        id: MessageId,
        receiver: PeerIdentity,
        text: String,
    },
    /// Ask for a `ConversationSnapshot`
    GetConversation { peer: PeerIdentity },
    StartDiscovery,
    StopDiscovery,
    ConnectToPeer { identity: PeerIdentity },
    DisconnectFromPeer { identity: PeerIdentity },
    /// Run a retry sweep immediately instead of waiting for the timer
    RetryNow,
    GetSystemStatus,
    Shutdown,
}

// ----------------------------------------------------------------------------
// Event: Radio → Router
// ----------------------------------------------------------------------------

/// Notifications from the radio task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PeerAppeared {
        handle: ConnectionHandle,
        identity: PeerIdentity,
    },
    PacketReceived {
        handle: ConnectionHandle,
        data: Vec<u8>,
    },
    PeerLost { handle: ConnectionHandle },
    /// The packet carrying `ticket` was handed to the link
    SendCompleted { ticket: SendTicket },
    /// The packet carrying `ticket` could not be sent
    SendFailed { ticket: SendTicket, reason: String },
    /// A radio operation other than a send failed
    TransportError { error: String },
}

// ----------------------------------------------------------------------------
// Effect: Router → Radio
// ----------------------------------------------------------------------------

/// Side effects the radio task executes on behalf of the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    SendPacket {
        handle: ConnectionHandle,
        data: Vec<u8>,
        ticket: SendTicket,
    },
    StartAdvertising,
    StartScanning,
    StopDiscovery,
    Connect { identity: PeerIdentity },
    Disconnect { handle: ConnectionHandle },
}

// ----------------------------------------------------------------------------
// AppEvent: Router → UI
// ----------------------------------------------------------------------------

/// State changes the presentation layer binds to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// A message addressed to this device arrived
    MessageReceived { message: Message },
    /// Delivery status of an own message changed
    StatusChanged {
        peer: PeerIdentity,
        id: MessageId,
        status: MessageStatus,
    },
    ConversationUpdated {
        peer: PeerIdentity,
        message_count: usize,
        last_message_time: u64,
    },
    /// Reply to `Command::GetConversation`
    ConversationSnapshot {
        peer: PeerIdentity,
        entries: Vec<ConversationEntry>,
    },
    PeerConnected {
        identity: PeerIdentity,
        handle: ConnectionHandle,
    },
    PeerDisconnected {
        identity: PeerIdentity,
        handle: ConnectionHandle,
    },
    /// A message for another device was forwarded
    MessageRelayed {
        id: MessageId,
        sender: PeerIdentity,
        receiver: PeerIdentity,
        hop_count: Option<u8>,
        fanout: usize,
    },
    /// An undecodable packet was dropped
    CorruptPacket {
        handle: ConnectionHandle,
        reason: String,
    },
    /// An own message ran out of retries
    DeliveryExpired {
        id: MessageId,
        receiver: PeerIdentity,
        attempts: u32,
    },
    SystemStatusReport { status: SystemStatus },
    SystemError { error: String },
}
