//! # companion-crypto
//!
//! Cryptographic primitives for the Companion link:
//! - SRP-6a client (pair-setup mutual authentication)
//! - HKDF-SHA512 key derivation with the HomeKit label set
//! - ChaCha20-Poly1305 sealing for pairing sub-TLVs and the data channel
//! - Ed25519 long-term identities, X25519 ephemeral agreement
//! - TLV8 codec for pairing payloads

pub mod chacha;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;
pub mod x25519;

pub use chacha::{nonce_from_counter, nonce_from_label, open, seal, ChannelCipher};
pub use ed25519::IdentityKeyPair;
pub use keys::{EncryptionKey, SessionKeys, SharedSecret};
pub use srp::{SrpChallenge, SrpClient, SrpProof};
pub use tlv::{Tlv8, TlvTag};
pub use x25519::EcdhKeyPair;
