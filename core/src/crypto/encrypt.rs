// Per-payload encryption on an agreed channel key: XChaCha20-Poly1305
//
// Flow:
// 1. Both peers agree on a ChannelKey during the invitation handshake
//    (X25519 + Blake3::derive_key, see identity::keys)
// 2. Sender draws a random 24-byte nonce
// 3. Encrypt: XChaCha20-Poly1305(channel_key, nonce, plaintext, aad = sender id)
// 4. Output: SealedPayload { nonce, ciphertext }
//
// Recipient reverses with the same channel key and the sender id it observed
// on the link. A payload replayed under another sender id fails to open.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{ChannelKey, PeerId};

/// Errors from sealing or opening payloads
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Failed to create cipher")]
    InvalidKey,
    #[error("Encryption failed")]
    SealFailed,
    #[error("Decryption failed: invalid ciphertext, wrong key, or sender mismatch")]
    OpenFailed,
}

/// Encrypted payload as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
}

/// Encrypt a payload for a peer we share `key` with.
pub fn seal_payload(
    key: &ChannelKey,
    sender: &PeerId,
    plaintext: &[u8],
) -> Result<SealedPayload, CryptoError> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKey)?;

    let mut nonce = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: sender.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::SealFailed)?;

    Ok(SealedPayload { nonce, ciphertext })
}

/// Decrypt a payload received from `sender`.
pub fn open_payload(
    key: &ChannelKey,
    sender: &PeerId,
    sealed: &SealedPayload,
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKey)?;

    cipher
        .decrypt(
            XNonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad: sender.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::OpenFailed)
}
