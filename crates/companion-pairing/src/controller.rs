//! Controller identity with a stable pairing identifier.
//!
//! The pairing identifier must be the same in pair-setup M5 and pair-verify
//! PV3, otherwise the Apple TV rejects the verify attempt.

use companion_crypto::ed25519::IdentityKeyPair;

/// Controller identity: Ed25519 keypair plus the stable UUID-format
/// identifier registered with the device.
#[derive(Clone)]
pub struct ControllerIdentity {
    id: String,
    keypair: IdentityKeyPair,
}

impl ControllerIdentity {
    /// Generate a fresh identity with an identifier derived from the
    /// public key.
    pub fn generate() -> Self {
        Self::from_keypair(IdentityKeyPair::generate())
    }

    /// Derive the identifier from the first 16 bytes of the public key so
    /// it stays stable for a given keypair.
    pub fn from_keypair(keypair: IdentityKeyPair) -> Self {
        let pk = keypair.public_key();
        let id = format!(
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            pk[0], pk[1], pk[2], pk[3],
            pk[4], pk[5],
            pk[6], pk[7],
            pk[8], pk[9],
            pk[10], pk[11], pk[12], pk[13], pk[14], pk[15]
        );
        Self { id, keypair }
    }

    /// Use a custom identifier with an existing keypair.
    pub fn with_id(keypair: IdentityKeyPair, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keypair,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The identifier as bytes for TLV encoding.
    pub fn id_bytes(&self) -> &[u8] {
        self.id.as_bytes()
    }

    pub fn keypair(&self) -> &IdentityKeyPair {
        &self.keypair
    }

    /// The LTPK (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    /// Sign with the LTSK.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }
}
