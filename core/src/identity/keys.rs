// Channel key management

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// KDF context string for deriving channel keys from X25519 shared secrets.
/// Changing this breaks compatibility with every peer on the network.
const KDF_CONTEXT: &str = "ar-collab session channel key v1";

/// Symmetric key shared with one remote peer
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ChannelKey([u8; 32]);

impl ChannelKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelKey(..)")
    }
}

/// Long-lived X25519 keys for one session
#[derive(Clone)]
pub struct ChannelKeys {
    secret: StaticSecret,
    public: PublicKey,
}

impl ChannelKeys {
    /// Generate new channel keys
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half, as sent in invitations
    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Public key as hex
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Agree on a channel key with a remote peer.
    ///
    /// Both sides arrive at the same key because X25519 is symmetric.
    pub fn agree(&self, remote_public: &[u8; 32]) -> ChannelKey {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*remote_public));
        ChannelKey(blake3::derive_key(KDF_CONTEXT, shared.as_bytes()))
    }
}

impl std::fmt::Debug for ChannelKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelKeys")
            .field("public", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_is_symmetric() {
        let alice = ChannelKeys::generate();
        let bob = ChannelKeys::generate();

        let ab = alice.agree(&bob.public_key());
        let ba = bob.agree(&alice.public_key());
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_distinct_peers_get_distinct_keys() {
        let alice = ChannelKeys::generate();
        let bob = ChannelKeys::generate();
        let carol = ChannelKeys::generate();

        assert_ne!(
            alice.agree(&bob.public_key()),
            alice.agree(&carol.public_key())
        );
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = ChannelKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{:?}", key), "ChannelKey(..)");
    }
}
