//! SRP-6a client for HomeKit pair-setup.
//!
//! Uses the RFC 5054 3072-bit group (group 15), generator g=5, SHA-512,
//! and the fixed username "Pair-Setup" with the device PIN as password.

use companion_core::error::PairingError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// SRP username for HomeKit pair-setup.
pub const SRP_USERNAME: &[u8] = b"Pair-Setup";

/// RFC 5054 3072-bit prime N as hex.
const RFC5054_N_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

/// SRP-6a group parameters (3072-bit, RFC 5054).
pub struct SrpParams {
    pub n: BigUint,
    pub g: BigUint,
}

impl Default for SrpParams {
    fn default() -> Self {
        let n = BigUint::parse_bytes(RFC5054_N_3072.as_bytes(), 16)
            .expect("Invalid RFC 5054 prime constant");
        Self {
            n,
            g: BigUint::from(5u32),
        }
    }
}

/// Client-side SRP state.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Server's M2 challenge: salt and public value B.
pub struct SrpChallenge {
    pub salt: [u8; 16],
    pub server_public_key: Vec<u8>,
}

/// Result of processing the challenge.
pub struct SrpProof {
    /// Client proof M1 sent in the pair-setup M3 message.
    pub client_proof: Vec<u8>,
    /// Session key K = H(S), 64 bytes.
    pub shared_secret: Vec<u8>,
    /// Server proof M2 the accessory must return in M4.
    pub expected_server_proof: Vec<u8>,
}

impl SrpClient {
    /// Create a new client with the pair-setup identity and PIN.
    pub fn new(pin: &[u8]) -> Self {
        Self::with_identity(SRP_USERNAME, pin)
    }

    /// Create with an explicit identity (the protocol fixes it to "Pair-Setup").
    pub fn with_identity(identity: &[u8], password: &[u8]) -> Self {
        let params = SrpParams::default();

        // 32 random bytes as private scalar a; A = g^a mod N.
        let a = OsRng.gen_biguint(256);
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: a.to_bytes_be(),
            public_key,
        }
    }

    /// Create with a fixed private scalar (deterministic tests only).
    #[cfg(test)]
    pub fn with_private_key(identity: &[u8], password: &[u8], private_key: &[u8]) -> Self {
        let params = SrpParams::default();
        let a = BigUint::from_bytes_be(private_key);
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: private_key.to_vec(),
            public_key,
        }
    }

    /// Client public value A, left-padded to 384 bytes.
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Process the server's challenge and derive the proofs and session key.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof, PairingError> {
        let b = BigUint::from_bytes_be(&challenge.server_public_key);

        if &b % &self.params.n == BigUint::ZERO {
            return Err(PairingError::InvalidServerKey);
        }

        let a = BigUint::from_bytes_be(&self.private_key);

        // u = H(PAD(A) || PAD(B))
        let u = hash_concat_padded(&self.public_key, &b);
        if u == BigUint::ZERO {
            return Err(PairingError::InvalidServerKey);
        }

        // x = H(salt || H(identity || ":" || password))
        let x = compute_x(&challenge.salt, &self.identity, &self.password);

        // k = H(N || PAD(g))
        let k = compute_k(&self.params);

        // S = ((N + B - k*g^x) mod N)^(a + u*x) mod N
        let g_x = self.params.g.modpow(&x, &self.params.n);
        let k_gx = (&k * &g_x) % &self.params.n;
        let base = (&b + &self.params.n - &k_gx) % &self.params.n;
        let exponent = &a + &u * &x;
        let s = base.modpow(&exponent, &self.params.n);

        // K = H(PAD(S))
        let shared_secret = Sha512::digest(pad_to_n(&s)).to_vec();

        let client_proof = compute_m1(
            &self.params,
            &self.identity,
            &challenge.salt,
            &self.public_key,
            &b,
            &shared_secret,
        );

        // Expected M2 = H(PAD(A) || M1 || K)
        let mut hasher = Sha512::new();
        hasher.update(pad_to_n(&self.public_key));
        hasher.update(&client_proof);
        hasher.update(&shared_secret);
        let expected_server_proof = hasher.finalize().to_vec();

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }

    /// Constant-time comparison of the server's M2 against the expectation.
    pub fn verify_server_proof(&self, proof: &[u8], expected: &[u8]) -> bool {
        proof.ct_eq(expected).into()
    }
}

/// M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K).
///
/// H(g) hashes the raw generator byte, NOT the padded form; padding g here
/// makes the accessory reject M3 with error 0x02. k = H(N || PAD(g)) does
/// use the padded form.
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let h_n = Sha512::digest(pad_to_n(&params.n));
    let h_g = Sha512::digest(params.g.to_bytes_be());

    let mut xored = [0u8; 64];
    for (dst, (x, y)) in xored.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *dst = x ^ y;
    }

    let h_i = Sha512::digest(identity);

    let mut hasher = Sha512::new();
    hasher.update(xored);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Left-pad a big-endian serialisation to 384 bytes.
pub fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// k = SHA512(PAD(N) || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(&params.n));
    hasher.update(pad_to_n(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// u = SHA512(PAD(A) || PAD(B)).
fn hash_concat_padded(a: &BigUint, b: &BigUint) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// x = SHA512(salt || SHA512(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(inner);
    BigUint::from_bytes_be(&hasher.finalize())
}
