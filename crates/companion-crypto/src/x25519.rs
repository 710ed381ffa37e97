//! X25519 ECDH for the pair-verify session key agreement.

use companion_core::error::CryptoError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// Ephemeral X25519 key pair, generated fresh for every pair-verify run.
#[derive(ZeroizeOnDrop)]
pub struct EcdhKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl EcdhKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    /// Create from existing secret bytes (tests and key restoration).
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let static_secret = StaticSecret::from(*secret);
        let public = PublicKey::from(&static_secret);
        Self {
            public: public.to_bytes(),
            secret: *secret,
        }
    }

    /// The public value sent in PV1 (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Perform Diffie-Hellman against the peer's ephemeral public value.
    ///
    /// Consumes the key pair; an all-zero shared secret (low-order peer
    /// point) is rejected.
    pub fn diffie_hellman(self, peer_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
        let static_secret = StaticSecret::from(self.secret);
        let shared = static_secret.diffie_hellman(&PublicKey::from(*peer_public));

        let shared_bytes = shared.to_bytes();
        if shared_bytes.iter().all(|&b| b == 0) {
            return Err(CryptoError::KeyDerivation(
                "Weak ECDH result: low-order peer point".to_string(),
            ));
        }

        Ok(shared_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_creates_unique_keys() {
        let a = EcdhKeyPair::generate();
        let b = EcdhKeyPair::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn both_sides_derive_same_secret() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();

        let alice_pub = alice.public_key();
        let bob_pub = bob.public_key();

        let s1 = alice.diffie_hellman(&bob_pub).unwrap();
        let s2 = bob.diffie_hellman(&alice_pub).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn rejects_low_order_point() {
        let kp = EcdhKeyPair::generate();
        assert!(kp.diffie_hellman(&[0u8; 32]).is_err());
    }

    #[test]
    fn from_secret_matches_rfc7748_vector() {
        // RFC 7748 section 6.1: Alice's key pair.
        let secret =
            hex::decode("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a")
                .unwrap();
        let expected_public =
            hex::decode("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a")
                .unwrap();

        let mut secret_arr = [0u8; 32];
        secret_arr.copy_from_slice(&secret);
        assert_eq!(
            EcdhKeyPair::from_secret(&secret_arr).public_key(),
            *expected_public
        );
    }
}
