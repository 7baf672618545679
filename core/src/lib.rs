// ar-collab session core
//
// Local-network peer sessions for collaborative apps: find nearby peers,
// agree on an encrypted channel, track who is in the session, and move
// opaque byte payloads between members.
//
// The radio or socket layer plugs in through `transport::Link`;
// `transport::LocalMedium` is an in-process implementation.

pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod discovery;
pub mod handlers;
pub mod identity;
pub mod transport;

use thiserror::Error;

pub use config::{
    CapabilityPolicy, EncryptionPreference, SessionConfig, MAX_INVITATION_TIMEOUT,
    SERVICE_NAMESPACE,
};
pub use coordinator::SessionCoordinator;
pub use crypto::CryptoError;
pub use discovery::{Advertiser, Browser, InvitationContext, DEFAULT_INVITATION_TIMEOUT};
pub use handlers::SessionHandlers;
pub use identity::{LocalIdentity, PeerId, PeerIdentity};
pub use transport::{
    Capability, DeliveryMode, Link, LinkEvent, LocalLink, LocalMedium, Payload,
    PeerConnectionState, SendOutcome, TransportError, TransportSession,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Cryptography error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("{peer} attempted unsupported {capability}")]
    UnsupportedCapability {
        peer: PeerIdentity,
        capability: Capability,
    },
    #[error("Session event loop terminated: {0}")]
    Terminated(String),
}
