//! HomeKit pair-verify (PV1-PV4).
//!
//! Per-session authentication from previously provisioned credentials:
//! X25519 ephemeral agreement plus Ed25519 signatures under the long-term
//! keys captured at pair-setup. Completion installs the Companion channel
//! keys.

use companion_core::error::{Error, PairingError, RejectReason, Result};
use companion_crypto::{
    chacha::{nonce_from_label, open, seal},
    hkdf,
    keys::{SessionKeys, SharedSecret},
    tlv::{Tlv8, TlvTag},
    x25519::EcdhKeyPair,
};
use tracing::debug;

use crate::controller::ControllerIdentity;

/// Nonce labels for the PV2/PV3 sealed sub-TLVs.
const PV_MSG02_NONCE: &[u8] = b"PV-Msg02";
const PV_MSG03_NONCE: &[u8] = b"PV-Msg03";

/// Pair-verify state machine.
///
/// Ephemeral per session; a failed run is discarded and a new one started.
pub struct PairVerify {
    state: PairVerifyState,
    controller: ControllerIdentity,
    /// Accessory LTPK from the stored credentials record.
    server_ltpk: [u8; 32],
    ecdh: Option<EcdhKeyPair>,
    our_eph: Option<[u8; 32]>,
    server_eph: Option<[u8; 32]>,
    shared_secret: Option<SharedSecret>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairVerifyState {
    Idle,
    Pv1Sent,
    Pv3Sent,
    Done,
    Failed,
}

impl PairVerify {
    /// Create a new run for the given controller and stored accessory LTPK.
    pub fn new(controller: ControllerIdentity, server_ltpk: [u8; 32]) -> Self {
        Self {
            state: PairVerifyState::Idle,
            controller,
            server_ltpk,
            ecdh: None,
            our_eph: None,
            server_eph: None,
            shared_secret: None,
        }
    }

    /// Generate PV1: `{seqNo=0x01, publicKey=ephemeral}`.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        if self.state != PairVerifyState::Idle {
            return Err(self.fail(PairingError::InvalidState(
                "PV1 can only be generated from the idle state",
            )));
        }

        let ecdh = EcdhKeyPair::generate();
        let public = ecdh.public_key();
        self.our_eph = Some(public);
        self.ecdh = Some(ecdh);

        let mut tlv = Tlv8::new();
        tlv.set(TlvTag::State, vec![0x01]);
        tlv.set(TlvTag::PublicKey, public.to_vec());

        self.state = PairVerifyState::Pv1Sent;
        Ok(tlv.encode())
    }

    /// Process PV2 `{seqNo=0x02, publicKey, encryptedData}` and generate PV3
    /// `{seqNo=0x03, encryptedData}`.
    pub fn handle_pv2(&mut self, response: &[u8]) -> Result<Vec<u8>> {
        if self.state != PairVerifyState::Pv1Sent {
            return Err(self.fail(PairingError::InvalidState(
                "PV2 can only be processed after sending PV1",
            )));
        }

        let tlv = Tlv8::parse(response);
        self.check_reply(&tlv, 0x02)?;

        let server_eph = match tlv.get(TlvTag::PublicKey) {
            Some(pk) if pk.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(pk);
                arr
            }
            Some(pk) => {
                return Err(self.fail(PairingError::Protocol(format!(
                    "PV2 public key has wrong length: {} (expected 32)",
                    pk.len()
                ))));
            }
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::PublicKey as u8))),
        };

        let encrypted = match tlv.get(TlvTag::EncryptedData) {
            Some(data) => data.to_vec(),
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::EncryptedData as u8))),
        };

        let ecdh = self
            .ecdh
            .take()
            .ok_or_else(|| PairingError::InvalidState("Ephemeral key not generated"))?;
        let shared = match ecdh.diffie_hellman(&server_eph) {
            Ok(shared) => shared,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        let verify_key = match hkdf::derive_pair_verify_key(&shared) {
            Ok(key) => key,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        let plaintext = match open(&verify_key, &nonce_from_label(PV_MSG02_NONCE), &encrypted) {
            Ok(p) => p,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        let inner = Tlv8::parse(&plaintext);
        let server_id = match inner.get(TlvTag::Identifier) {
            Some(id) => id.to_vec(),
            None => return Err(self.fail(PairingError::MissingTag(TlvTag::Identifier as u8))),
        };
        let signature = match inner.get(TlvTag::Signature) {
            Some(sig) if sig.len() == 64 => {
                let mut arr = [0u8; 64];
                arr.copy_from_slice(sig);
                arr
            }
            _ => return Err(self.fail(PairingError::MissingTag(TlvTag::Signature as u8))),
        };

        // The accessory signs server_eph || server_id || our_eph with the
        // LTPK we captured at pair-setup.
        let our_eph = self
            .our_eph
            .ok_or_else(|| PairingError::InvalidState("Ephemeral key not generated"))?;
        let mut signed_info = Vec::new();
        signed_info.extend_from_slice(&server_eph);
        signed_info.extend_from_slice(&server_id);
        signed_info.extend_from_slice(&our_eph);

        if companion_crypto::ed25519::verify(&self.server_ltpk, &signed_info, &signature).is_err()
        {
            return Err(self.fail(PairingError::SignatureVerificationFailed));
        }

        // PV3: our identifier and signature over our_eph || id || server_eph.
        let mut device_info = Vec::new();
        device_info.extend_from_slice(&our_eph);
        device_info.extend_from_slice(self.controller.id_bytes());
        device_info.extend_from_slice(&server_eph);
        let our_signature = self.controller.sign(&device_info);

        let mut inner = Tlv8::new();
        inner.set(TlvTag::Identifier, self.controller.id_bytes().to_vec());
        inner.set(TlvTag::Signature, our_signature.to_vec());

        let sealed = match seal(&verify_key, &nonce_from_label(PV_MSG03_NONCE), &inner.encode()) {
            Ok(sealed) => sealed,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        let mut tlv = Tlv8::new();
        tlv.set(TlvTag::State, vec![0x03]);
        tlv.set(TlvTag::EncryptedData, sealed);

        self.server_eph = Some(server_eph);
        self.shared_secret = Some(SharedSecret::new(shared.to_vec()));
        self.state = PairVerifyState::Pv3Sent;
        debug!("pair-verify PV2 verified, sending PV3");
        Ok(tlv.encode())
    }

    /// Process PV4 `{seqNo=0x04}`, completing verification.
    ///
    /// Returns the Companion channel keys; counters start at zero.
    pub fn handle_pv4(&mut self, response: &[u8]) -> Result<SessionKeys> {
        if self.state != PairVerifyState::Pv3Sent {
            return Err(self.fail(PairingError::InvalidState(
                "PV4 can only be processed after sending PV3",
            )));
        }

        let tlv = Tlv8::parse(response);
        self.check_reply(&tlv, 0x04)?;

        let shared = self
            .shared_secret
            .as_ref()
            .ok_or_else(|| PairingError::InvalidState("Shared secret not derived"))?;

        let keys = match SessionKeys::derive_channel_keys(shared) {
            Ok(keys) => keys,
            Err(e) => return Err(self.fail_crypto(e)),
        };

        self.state = PairVerifyState::Done;
        debug!("pair-verify complete, channel keys installed");
        Ok(keys)
    }

    pub fn is_done(&self) -> bool {
        self.state == PairVerifyState::Done
    }

    fn check_reply(&mut self, tlv: &Tlv8, expected_seq: u8) -> Result<()> {
        if let Some(code) = tlv.error() {
            let retry_delay = tlv.retry_delay();
            self.state = PairVerifyState::Failed;
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
        self.state = PairVerifyState::Failed;
        err.into()
    }

    fn fail_crypto(&mut self, err: companion_core::error::CryptoError) -> Error {
        self.state = PairVerifyState::Failed;
        err.into()
    }
}
