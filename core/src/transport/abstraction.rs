//! Transport abstraction layer for the collaborative session
//!
//! Defines the core types and events shared by the link seam, the transport
//! session, and the discovery roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::identity::{PeerId, PeerIdentity};

/// Delivery guarantee requested for one send
///
/// `Reliable` means the link delivers a successfully initiated send in order
/// and without loss. Neither mode retries a send that failed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMode {
    Reliable,
    BestEffort,
}

impl DeliveryMode {
    pub fn from_reliable(reliable: bool) -> Self {
        if reliable {
            DeliveryMode::Reliable
        } else {
            DeliveryMode::BestEffort
        }
    }

    pub fn is_reliable(&self) -> bool {
        matches!(self, DeliveryMode::Reliable)
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Reliable => write!(f, "Reliable"),
            DeliveryMode::BestEffort => write!(f, "BestEffort"),
        }
    }
}

/// Connection state of one remote peer inside the transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerConnectionState {
    NotConnected,
    Connecting,
    Connected,
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "NotConnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Opaque bytes plus the delivery mode they travelled with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: Vec<u8>,
    pub mode: DeliveryMode,
}

impl Payload {
    pub fn new(data: Vec<u8>, mode: DeliveryMode) -> Self {
        Self { data, mode }
    }
}

/// Events from the link layer to the session coordinator
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// An advertiser was found under the browsed namespace
    PeerFound { peer: PeerIdentity },
    /// A previously found advertiser is no longer discoverable
    PeerLost { peer: PeerIdentity },
    /// An encoded frame arrived from a peer
    Received { from: PeerIdentity, bytes: Vec<u8> },
    /// The link to a peer went away
    LinkDown { peer: PeerIdentity },
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::PeerFound { peer } => write!(f, "PeerFound {{ peer: {} }}", peer),
            LinkEvent::PeerLost { peer } => write!(f, "PeerLost {{ peer: {} }}", peer),
            LinkEvent::Received { from, bytes } => {
                write!(f, "Received {{ from: {}, len: {} }}", from, bytes.len())
            }
            LinkEvent::LinkDown { peer } => write!(f, "LinkDown {{ peer: {} }}", peer),
        }
    }
}

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(PeerId),

    #[error("Peer not connected: {0}")]
    PeerNotConnected(PeerId),

    #[error("Link not open")]
    NotOpen,

    #[error("Link already open")]
    AlreadyOpen,

    #[error("Link closed")]
    LinkClosed,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Invitation timeout out of range: {0:?}")]
    TimeoutOutOfRange(std::time::Duration),
}
