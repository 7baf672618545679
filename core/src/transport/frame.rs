// Session wire protocol: frame types and bincode codec with size limits

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::abstraction::{DeliveryMode, TransportError};
use crate::crypto::SealedPayload;

/// Maximum encoded frame size: 256 KB
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Maximum application payload per frame: 64 KB
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Identifier tying an invitation to its reply and confirmation
pub type InvitationId = Uuid;

/// Body of a data frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBody {
    /// Encrypted under the channel key agreed with the receiver
    Sealed(SealedPayload),
    /// Only used when neither side negotiated encryption
    Plain(Vec<u8>),
}

/// Invitation to join the sender's session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub invitation_id: InvitationId,
    /// Inviter's X25519 public key, absent when it does not encrypt
    pub public_key: Option<[u8; 32]>,
    pub context: Option<Vec<u8>>,
}

/// Answer to an [`Invite`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteReply {
    pub invitation_id: InvitationId,
    pub accepted: bool,
    pub public_key: Option<[u8; 32]>,
}

/// Everything one session peer can send another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Invite(Invite),
    InviteReply(InviteReply),
    /// Inviter's acknowledgement of an accepted reply; completes the join
    Confirm { invitation_id: InvitationId },
    Data { mode: DeliveryMode, body: DataBody },
    /// Sender is leaving the session
    Goodbye,
    /// Streamed data; never supported by this session
    Stream { name: String },
    /// File-resource transfer; never supported by this session
    Resource { name: String },
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Invite(_) => "invite",
            Frame::InviteReply(_) => "invite-reply",
            Frame::Confirm { .. } => "confirm",
            Frame::Data { .. } => "data",
            Frame::Goodbye => "goodbye",
            Frame::Stream { .. } => "stream",
            Frame::Resource { .. } => "resource",
        }
    }
}

/// Serialize a frame to bytes (bincode)
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, TransportError> {
    if let Frame::Data { body, .. } = frame {
        let size = match body {
            DataBody::Sealed(sealed) => sealed.ciphertext.len(),
            DataBody::Plain(bytes) => bytes.len(),
        };
        if size > MAX_PAYLOAD_SIZE + 16 {
            return Err(TransportError::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }
    }

    let bytes = bincode::serialize(frame).map_err(|e| TransportError::Codec(e.to_string()))?;

    if bytes.len() > MAX_FRAME_SIZE {
        return Err(TransportError::PayloadTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(bytes)
}

/// Deserialize bytes to a frame
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, TransportError> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(TransportError::PayloadTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    bincode::deserialize(bytes).map_err(|e| TransportError::Codec(e.to_string()))
}
