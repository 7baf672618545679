// Cryptography module: payload encryption on agreed channel keys

pub mod encrypt;

pub use encrypt::{open_payload, seal_payload, CryptoError, SealedPayload};
