//! Wire format for the message envelope
//!
//! A packet is one version byte followed by the `bincode` body of the envelope.
//! The body uses bounded varint encoding and rejects trailing bytes, so a
//! truncated or padded packet never decodes into a message.

use bincode::Options;

use crate::errors::{MeshChatError, PacketError, Result, INVALID_IDENTITY};
use crate::message::{Message, MessageKind};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Current envelope version
pub const WIRE_VERSION: u8 = 1;

/// Largest packet accepted off the radio
pub const MAX_PACKET_SIZE: usize = 2048;

/// Largest text accepted in an envelope, in characters
pub const MAX_WIRE_TEXT_CHARS: usize = 260;

// ----------------------------------------------------------------------------
// Wire Format Codec
// ----------------------------------------------------------------------------

/// Binary encoder/decoder for `Message`
pub struct WireFormat;

impl WireFormat {
    fn options() -> impl Options {
        bincode::DefaultOptions::new().with_limit(MAX_PACKET_SIZE as u64)
    }

    /// Encode a message to its wire representation
    pub fn encode(message: &Message) -> Result<Vec<u8>> {
        Self::validate(message)?;

        let body = Self::options()
            .serialize(message)
            .map_err(|e| MeshChatError::malformed(format!("encode failed: {}", e)))?;

        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(WIRE_VERSION);
        bytes.extend_from_slice(&body);

        if bytes.len() > MAX_PACKET_SIZE {
            return Err(PacketError::PayloadTooLarge {
                max: MAX_PACKET_SIZE,
                actual: bytes.len(),
            }
            .into());
        }

        Ok(bytes)
    }

    /// Decode a message from its wire representation
    pub fn decode(bytes: &[u8]) -> Result<Message> {
        let (&version, body) = bytes.split_first().ok_or(PacketError::Empty)?;

        if version != WIRE_VERSION {
            return Err(PacketError::UnsupportedVersion { version }.into());
        }

        if bytes.len() > MAX_PACKET_SIZE {
            return Err(PacketError::PayloadTooLarge {
                max: MAX_PACKET_SIZE,
                actual: bytes.len(),
            }
            .into());
        }

        // Identity validation surfaces through serde as a custom error carrying its Display text
        let message: Message = Self::options().deserialize(body).map_err(|e| match *e {
            bincode::ErrorKind::Custom(reason) if reason.starts_with(INVALID_IDENTITY) => {
                let reason = reason
                    .trim_start_matches(INVALID_IDENTITY)
                    .trim_start_matches(':')
                    .trim_start()
                    .to_string();
                MeshChatError::InvalidPacket(PacketError::InvalidIdentity { reason })
            }
            other => MeshChatError::malformed(other.to_string()),
        })?;

        Self::validate(&message)?;
        Ok(message)
    }

    /// Envelope rules shared by both directions
    fn validate(message: &Message) -> Result<()> {
        let length = message.text_len();
        if length > MAX_WIRE_TEXT_CHARS {
            return Err(PacketError::TextTooLong {
                max: MAX_WIRE_TEXT_CHARS,
                actual: length,
            }
            .into());
        }

        if message.kind == MessageKind::ReadAck && !message.text.is_empty() {
            return Err(MeshChatError::malformed("read receipt carries text"));
        }

        Ok(())
    }
}
