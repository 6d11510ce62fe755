//! MeshChat Core
//!
//! Routing and reliable-delivery core of the MeshChat offline messenger. Chat
//! messages travel between nearby devices over a short-range radio mesh with no
//! central server. This crate decides, for every packet, whether it is for this
//! device, must be relayed, or is a duplicate; it keeps per-peer conversation
//! history and parks undeliverable messages in a retry store.
//!
//! The crate performs no I/O and spawns no tasks. The radio driver and the
//! record store are external collaborators behind the `Radio` and `RecordStore`
//! traits; `meshchat-runtime` wires everything together over CSP channels.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod codec;
pub mod config;
pub mod conversation;
pub mod dedup;
pub mod errors;
pub mod message;
pub mod retry_store;
pub mod router;
pub mod storage;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{AppEvent, Command, Effect, Event};
pub use codec::{WireFormat, MAX_PACKET_SIZE, MAX_WIRE_TEXT_CHARS, WIRE_VERSION};
pub use config::{ChannelConfig, DedupConfig, MeshChatConfig, RetryPolicy, RouterConfig};
pub use conversation::{Conversation, ConversationBook, ConversationEntry};
pub use dedup::{DedupKey, DedupLedger, DeduplicationStats};
pub use errors::{MeshChatError, MeshChatResult, PacketError, Result, StorageError, TransportError};
pub use message::{Message, MessageKind, MessageStatus};
pub use retry_store::{RetryStore, StoredMessage};
pub use router::{Router, RouterOutput, RouterStats, SystemStatus};
pub use storage::{MemoryRecordStore, Record, RecordStore};
pub use transport::{Peer, PeerDirectory, Radio, RadioEvent};
pub use types::{
    ConnectionHandle, ManualClock, MessageId, PeerIdentity, SendTicket, SystemTimeSource,
    TimeSource, Timestamp, Ttl,
};
