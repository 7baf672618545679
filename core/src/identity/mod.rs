// Peer identity: opaque id + display name, and the local peer's channel keys

mod keys;

pub use keys::{ChannelKey, ChannelKeys};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique token identifying one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a fresh random id
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw bytes, used as associated data when sealing payloads
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// First 8 hex chars, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A participant in the session, including ourselves
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    id: PeerId,
    display_name: String,
}

impl PeerIdentity {
    /// Create an identity with a fresh id
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: PeerId::random(),
            display_name: display_name.into(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id.short())
    }
}

/// The local peer: public identity plus the keys used to join encrypted channels
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    peer: PeerIdentity,
    keys: ChannelKeys,
}

impl LocalIdentity {
    /// Generate the local identity once per session
    pub fn generate(display_name: impl Into<String>) -> Self {
        let peer = PeerIdentity::new(display_name);
        tracing::info!("🔑 Generated session identity {}", peer);
        Self {
            peer,
            keys: ChannelKeys::generate(),
        }
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn keys(&self) -> &ChannelKeys {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identities_are_unique() {
        let a = PeerIdentity::new("iPad");
        let b = PeerIdentity::new("iPad");
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a.display_name(), b.display_name());
    }

    #[test]
    fn test_identity_hash_and_eq() {
        let a = PeerIdentity::new("alice");
        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(a.clone());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&a));
    }

    #[test]
    fn test_display_includes_name_and_short_id() {
        let a = PeerIdentity::new("alice");
        let shown = a.to_string();
        assert!(shown.starts_with("alice ("));
        assert!(shown.contains(&a.id().short()));
        assert_eq!(a.id().short().len(), 8);
    }

    #[test]
    fn test_local_identity_generation() {
        let local = LocalIdentity::generate("bob");
        assert_eq!(local.peer().display_name(), "bob");
        assert_eq!(local.keys().public_key_hex().len(), 64);
    }
}
