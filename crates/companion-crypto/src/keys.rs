//! Session key types and derivation.

use crate::hkdf;
use companion_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret from SRP (64 bytes) or X25519 ECDH (32 bytes).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

/// 32-byte AEAD key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

/// Directional channel keys derived after pair-verify.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Seals frames we send (Control-Write).
    pub send_key: EncryptionKey,
    /// Opens frames we receive (Control-Read).
    pub recv_key: EncryptionKey,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("send_key", &"<redacted>")
            .field("recv_key", &"<redacted>")
            .finish()
    }
}

impl SharedSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl SessionKeys {
    /// Derive the Companion channel keys from the pair-verify shared secret.
    pub fn derive_channel_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        let send_key = hkdf::derive_control_write_key(shared_secret.as_bytes())?;
        let recv_key = hkdf::derive_control_read_key(shared_secret.as_bytes())?;
        Ok(Self {
            send_key: EncryptionKey(send_key),
            recv_key: EncryptionKey(recv_key),
        })
    }
}
