//! Error types for the MeshChat core
//!
//! This module contains every error surfaced by the routing core: transport failures
//! that the router recovers from by queueing, packet decode failures, persistence
//! failures, and the caller-visible rejections (`MessageTooLong`, `EmptyMessage`).

use crate::types::{ConnectionHandle, MessageId};

/// Leading text of every `MeshChatError::InvalidIdentity` message
pub(crate) const INVALID_IDENTITY: &str = "Invalid identity";

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures reported by the radio capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Peer {peer} is not reachable")]
    PeerUnreachable { peer: String },
    #[error("Link {handle} is down")]
    LinkDown { handle: ConnectionHandle },
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

/// Failures decoding or validating a wire packet
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("Packet is empty")]
    Empty,
    #[error("Unsupported wire version {version}")]
    UnsupportedVersion { version: u8 },
    #[error("Malformed envelope: {reason}")]
    Malformed { reason: String },
    #[error("Packet too large (max {max}, got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },
    #[error("Message text too long (max {max} characters, got {actual})")]
    TextTooLong { max: usize, actual: usize },
    #[error("Invalid identity in envelope: {reason}")]
    InvalidIdentity { reason: String },
}

/// Failures reported by a record store collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Record not found: {key}")]
    NotFound { key: String },
    #[error("Storage backend failure: {reason}")]
    Backend { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the MeshChat routing layer
#[derive(Debug, thiserror::Error)]
pub enum MeshChatError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid packet: {0}")]
    InvalidPacket(#[from] PacketError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Message is {length} characters long (max {max})")]
    MessageTooLong { length: usize, max: usize },

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Delivery of message {message_id} expired")]
    DeliveryExpired { message_id: MessageId },

    #[error("{prefix}: {reason}", prefix = INVALID_IDENTITY)]
    InvalidIdentity { reason: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Channel error: {message}")]
    Channel { message: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl MeshChatError {
    /// Create a malformed packet error with a reason
    pub fn malformed<T: Into<String>>(reason: T) -> Self {
        MeshChatError::InvalidPacket(PacketError::Malformed {
            reason: reason.into(),
        })
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        MeshChatError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        MeshChatError::Channel {
            message: message.into(),
        }
    }

    /// Create a peer unreachable error
    pub fn peer_unreachable<P: Into<String>>(peer: P) -> Self {
        MeshChatError::Transport(TransportError::PeerUnreachable { peer: peer.into() })
    }

    /// Create a link down error for a stale handle
    pub fn link_down(handle: ConnectionHandle) -> Self {
        MeshChatError::Transport(TransportError::LinkDown { handle })
    }

    /// Create a storage backend error
    pub fn storage<T: Into<String>>(reason: T) -> Self {
        MeshChatError::Storage(StorageError::Backend {
            reason: reason.into(),
        })
    }

    /// Whether the router absorbs this error and keeps serving other peers.
    ///
    /// Only channel and configuration failures are fatal to the router task.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            MeshChatError::Channel { .. } | MeshChatError::Configuration { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, MeshChatError>;
pub type MeshChatResult<T> = Result<T>;
