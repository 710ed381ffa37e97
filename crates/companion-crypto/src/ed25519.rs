//! Ed25519 long-term identity keys and signature verification.

use companion_core::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

/// Long-term Ed25519 identity key pair (LTSK/LTPK).
///
/// Clone is implemented so the same identity can drive pair-setup and
/// pair-verify; every copy zeroizes its seed on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    seed: [u8; 32],
}

impl IdentityKeyPair {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            public: signing_key.verifying_key().to_bytes(),
            seed: signing_key.to_bytes(),
        }
    }

    /// Rebuild from a stored 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            public: signing_key.verifying_key().to_bytes(),
            seed: *seed,
        }
    }

    /// Load from the 64-byte stored form: seed || public key.
    ///
    /// Validates that the embedded public key matches the seed.
    pub fn from_stored(material: &[u8; 64]) -> Result<Self, CryptoError> {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&material[..32]);

        let derived = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        if derived != material[32..] {
            return Err(CryptoError::KeyDerivation(
                "Stored public key does not match seed".to_string(),
            ));
        }

        Ok(Self {
            public: derived,
            seed,
        })
    }

    /// The LTPK (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Sign a message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signing_key = SigningKey::from_bytes(&self.seed);
        signing_key.sign(message).to_bytes()
    }

    /// The 64-byte stored form: seed || public key.
    pub fn to_stored(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.seed);
        out[32..].copy_from_slice(&self.public);
        out
    }
}

/// Verify an Ed25519 signature.
pub fn verify(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::KeyDerivation(format!("Invalid public key: {}", e)))?;

    verifying_key
        .verify(message, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::Encryption("Signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_creates_unique_keys() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn from_seed_is_deterministic() {
        let seed = [0x42u8; 32];
        assert_eq!(
            IdentityKeyPair::from_seed(&seed).public_key(),
            IdentityKeyPair::from_seed(&seed).public_key()
        );
    }

    #[test]
    fn from_seed_derives_rfc8032_public_key() {
        // RFC 8032 test vector 1.
        let seed = hex::decode("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60")
            .unwrap();
        let expected =
            hex::decode("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
                .unwrap();

        let mut seed_arr = [0u8; 32];
        seed_arr.copy_from_slice(&seed);
        assert_eq!(IdentityKeyPair::from_seed(&seed_arr).public_key(), *expected);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let identity = IdentityKeyPair::generate();
        let signature = identity.sign(b"device info");
        verify(&identity.public_key(), b"device info", &signature).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let identity = IdentityKeyPair::generate();
        let signature = identity.sign(b"device info");
        assert!(verify(&identity.public_key(), b"device warp", &signature).is_err());
    }

    #[test]
    fn stored_form_roundtrips() {
        let identity = IdentityKeyPair::generate();
        let stored = identity.to_stored();
        let loaded = IdentityKeyPair::from_stored(&stored).unwrap();
        assert_eq!(loaded.public_key(), identity.public_key());
    }

    #[test]
    fn stored_form_with_mismatched_public_is_rejected() {
        let identity = IdentityKeyPair::generate();
        let mut stored = identity.to_stored();
        stored[40] ^= 0xFF;
        assert!(IdentityKeyPair::from_stored(&stored).is_err());
    }
}
