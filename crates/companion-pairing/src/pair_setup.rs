//! HomeKit pair-setup (M1-M6).
//!
//! SRP-6a mutual authentication with the on-screen PIN, followed by an
//! encrypted exchange of long-term Ed25519 identities. A successful run
//! yields the accessory's identifier and LTPK for the credentials record.

use companion_core::error::{Error, PairingError, RejectReason, Result};
use companion_crypto::{
    chacha::{nonce_from_label, open, seal},
    hkdf,
    srp::{SrpChallenge, SrpClient, SrpProof},
    tlv::{Tlv8, TlvTag},
};
use tracing::debug;

use crate::controller::ControllerIdentity;

/// Nonce labels for the M5/M6 sealed sub-TLVs.
const PS_MSG05_NONCE: &[u8] = b"PS-Msg05";
const PS_MSG06_NONCE: &[u8] = b"PS-Msg06";

/// Pair-setup state machine.
///
/// Drives M1 -> M3 -> M5; every reply is validated against the expected
/// sequence number and any accessory error tag is surfaced verbatim. A
/// failure poisons the machine; the caller must start over.
pub struct PairSetup {
    state: PairSetupState,
    controller: ControllerIdentity,
    pin: String,
    srp_client: Option<SrpClient>,
    srp_proof: Option<SrpProof>,
    session_key: Option<[u8; 32]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairSetupState {
    Idle,
    M1Sent,
    M3Sent,
    M5Sent,
    Done,
    Failed,
}

/// What a completed pair-setup produces: the accessory side of the
/// credentials record.
#[derive(Debug)]
pub struct PairSetupOutcome {
    pub server_identifier: Vec<u8>,
    pub server_ltpk: [u8; 32],
}

impl PairSetup {
    /// Create a new pair-setup run for the given controller and PIN.
    pub fn new(controller: ControllerIdentity, pin: &str) -> Self {
        Self {
            state: PairSetupState::Idle,
            controller,
            pin: pin.to_string(),
            srp_client: None,
            srp_proof: None,
            session_key: None,
        }
    }

    /// Generate M1: `{seqNo=0x01, method=0x00}`.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        if self.state != PairSetupState::Idle {
            return Err(self.fail(PairingError::InvalidState(
                "M1 can only be generated from the idle state",
            )));
        }

        self.srp_client = Some(SrpClient::new(self.pin.as_bytes()));

        let mut tlv = Tlv8::new();
        tlv.set(TlvTag::State, vec![0x01]);
        tlv.set(TlvTag::Method, vec![0x00]);

        self.state = PairSetupState::M1Sent;
        Ok(tlv.encode())
    }

    /// Process M2 `{seqNo=0x02, salt, publicKey}` and generate M3
    /// `{seqNo=0x03, publicKey=A, proof=M1}`.
    pub fn handle_m2(&mut self, response: &[u8]) -> Result<Vec<u8>> {
        if self.state != PairSetupState::M1Sent {
            return Err(self.fail(PairingError::InvalidState(
                "M2 can only be processed after sending M1",
            )));
        }

        let tlv = Tlv8::parse(response);
        self.check_reply(&tlv, 0x02)?;

        let salt = match tlv.get(TlvTag::Salt) {
            Some(s) if s.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(s);
                arr
            }
            Some(s) => {
                return Err(self.fail(PairingError::Protocol(format!(
                    "M2 salt has wrong length: {} (expected 16)",
                    s.len()
                ))));
            }
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::Salt as u8))),
        };

        let server_pk_raw = match tlv.get(TlvTag::PublicKey) {
            Some(pk) => pk,
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::PublicKey as u8))),
        };

        // Accessories may strip leading zero bytes from B.
        let server_pk = if server_pk_raw.len() < 384 {
            let mut padded = vec![0u8; 384 - server_pk_raw.len()];
            padded.extend_from_slice(server_pk_raw);
            padded
        } else if server_pk_raw.len() == 384 {
            server_pk_raw.to_vec()
        } else {
            return Err(self.fail(PairingError::Protocol(format!(
                "M2 public key too long: {} (expected <= 384)",
                server_pk_raw.len()
            ))));
        };

        let srp_client = self
            .srp_client
            .as_ref()
            .ok_or_else(|| PairingError::InvalidState("SRP client not initialised"))?;

        let challenge = SrpChallenge {
            salt,
            server_public_key: server_pk,
        };
        let proof = match srp_client.process_challenge(&challenge) {
            Ok(proof) => proof,
            Err(e) => return Err(self.fail(e)),
        };

        let mut tlv = Tlv8::new();
        tlv.set(TlvTag::State, vec![0x03]);
        tlv.set(TlvTag::PublicKey, srp_client.public_key());
        tlv.set(TlvTag::Proof, proof.client_proof.clone());

        self.srp_proof = Some(proof);
        self.state = PairSetupState::M3Sent;
        debug!("pair-setup M2 processed, sending M3");
        Ok(tlv.encode())
    }

    /// Process M4 `{seqNo=0x04, proof}` and generate M5
    /// `{seqNo=0x05, encryptedData}`.
    pub fn handle_m4(&mut self, response: &[u8]) -> Result<Vec<u8>> {
        if self.state != PairSetupState::M3Sent {
            return Err(self.fail(PairingError::InvalidState(
                "M4 can only be processed after sending M3",
            )));
        }

        let tlv = Tlv8::parse(response);
        self.check_reply(&tlv, 0x04)?;

        let server_proof = match tlv.get(TlvTag::Proof) {
            Some(p) => p.to_vec(),
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::Proof as u8))),
        };

        let (verified, shared_secret) = {
            let srp_client = self
                .srp_client
                .as_ref()
                .ok_or_else(|| PairingError::InvalidState("SRP client not initialised"))?;
            let proof = self
                .srp_proof
                .as_ref()
                .ok_or_else(|| PairingError::InvalidState("SRP proof not computed"))?;
            (
                srp_client.verify_server_proof(&server_proof, &proof.expected_server_proof),
                proof.shared_secret.clone(),
            )
        };

        if !verified {
            return Err(self.fail(PairingError::ProofMismatch));
        }

        // Encryption key for the M5/M6 sealed sub-TLVs.
        let session_key = match hkdf::derive_pair_setup_key(&shared_secret) {
            Ok(key) => key,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        // device_info = controller-sign-key || pairing_id || LTPK, signed
        // with the controller's LTSK.
        let sign_key = match hkdf::derive_controller_sign_key(&shared_secret) {
            Ok(key) => key,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        let mut device_info = Vec::new();
        device_info.extend_from_slice(&sign_key);
        device_info.extend_from_slice(self.controller.id_bytes());
        device_info.extend_from_slice(&self.controller.public_key());
        let signature = self.controller.sign(&device_info);

        let mut inner = Tlv8::new();
        inner.set(TlvTag::Identifier, self.controller.id_bytes().to_vec());
        inner.set(TlvTag::PublicKey, self.controller.public_key().to_vec());
        inner.set(TlvTag::Signature, signature.to_vec());

        let sealed = match seal(&session_key, &nonce_from_label(PS_MSG05_NONCE), &inner.encode()) {
            Ok(sealed) => sealed,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        let mut tlv = Tlv8::new();
        tlv.set(TlvTag::State, vec![0x05]);
        tlv.set(TlvTag::EncryptedData, sealed);

        self.session_key = Some(session_key);
        self.state = PairSetupState::M5Sent;
        debug!("pair-setup M4 verified, sending M5");
        Ok(tlv.encode())
    }

    /// Process M6 `{seqNo=0x06, encryptedData}`, completing pair-setup.
    pub fn handle_m6(&mut self, response: &[u8]) -> Result<PairSetupOutcome> {
        if self.state != PairSetupState::M5Sent {
            return Err(self.fail(PairingError::InvalidState(
                "M6 can only be processed after sending M5",
            )));
        }

        let tlv = Tlv8::parse(response);
        self.check_reply(&tlv, 0x06)?;

        let encrypted = match tlv.get(TlvTag::EncryptedData) {
            Some(data) => data,
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::EncryptedData as u8))),
        };

        let session_key = self
            .session_key
            .ok_or_else(|| PairingError::InvalidState("Session key not derived"))?;

        let plaintext = match open(&session_key, &nonce_from_label(PS_MSG06_NONCE), encrypted) {
            Ok(p) => p,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        let inner = Tlv8::parse(&plaintext);

        let server_id = match inner.get(TlvTag::Identifier) {
            Some(id) => id.to_vec(),
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::Identifier as u8))),
        };
        let server_pk = match inner.get(TlvTag::PublicKey) {
            Some(pk) if pk.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(pk);
                arr
            }
            Some(pk) => {
                return Err(self.fail(PairingError::Protocol(format!(
                    "M6 server LTPK has wrong length: {} (expected 32)",
                    pk.len()
                ))));
            }
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::PublicKey as u8))),
        };
        let server_sig = match inner.get(TlvTag::Signature) {
            Some(sig) if sig.len() == 64 => {
                let mut arr = [0u8; 64];
                arr.copy_from_slice(sig);
                arr
            }
            Some(sig) => {
                return Err(self.fail(PairingError::Protocol(format!(
                    "M6 signature has wrong length: {} (expected 64)",
                    sig.len()
                ))));
            }
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::Signature as u8))),
        };

        let shared_secret = self
            .srp_proof
            .as_ref()
            .ok_or_else(|| PairingError::InvalidState("SRP proof not computed"))?
            .shared_secret
            .clone();

        let accessory_sign_key = match hkdf::derive_accessory_sign_key(&shared_secret) {
            Ok(key) => key,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        let mut accessory_info = Vec::new();
        accessory_info.extend_from_slice(&accessory_sign_key);
        accessory_info.extend_from_slice(&server_id);
        accessory_info.extend_from_slice(&server_pk);

        if companion_crypto::ed25519::verify(&server_pk, &accessory_info, &server_sig).is_err() {
            return Err(self.fail(PairingError::SignatureVerificationFailed));
        }

        self.state = PairSetupState::Done;
        debug!("pair-setup complete");
        Ok(PairSetupOutcome {
            server_identifier: server_id,
            server_ltpk: server_pk,
        })
    }

    /// Whether the exchange completed successfully.
    pub fn is_done(&self) -> bool {
        self.state == PairSetupState::Done
    }

    /// Reject accessory errors and sequence mismatches.
    fn check_reply(&mut self, tlv: &Tlv8, expected_seq: u8) -> Result<()> {
        if let Some(code) = tlv.error() {
            let retry_delay = tlv.retry_delay();
            self.state = PairSetupState::Failed;
            return Err(PairingError::Rejected {
                reason: RejectReason::from_code(code),
                retry_delay,
            }
            .into());
        }
        match tlv.state() {
            Some(seq) if seq == expected_seq => Ok(()),
            Some(seq) => Err(self.fail(PairingError::UnexpectedSequence {
                expected: expected_seq,
                actual: seq,
            })),
            None => Err(self.fail(PairingError::MissingTag(TlvTag::State as u8))),
        }
    }

    fn fail(&mut self, err: PairingError) -> Error {
        self.state = PairSetupState::Failed;
        err.into()
    }

    fn fail_crypto(&mut self, err: companion_core::error::CryptoError) -> Error {
        self.state = PairSetupState::Failed;
        err.into()
    }
}
