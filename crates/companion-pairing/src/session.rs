//! Pairing session orchestrator.
//!
//! Wraps the pair-setup and pair-verify machines behind a start/continue
//! step API so the connection layer only shuttles opaque payloads. Exactly
//! one machine is active at a time.

use companion_core::error::{Error, PairingError, Result};
use companion_crypto::keys::SessionKeys;

use crate::controller::ControllerIdentity;
use crate::pair_setup::{PairSetup, PairSetupOutcome};
use crate::pair_verify::PairVerify;

/// High-level pairing session driving one exchange at a time.
pub struct PairingSession {
    controller: ControllerIdentity,
    pair_setup: Option<PairSetup>,
    setup_stage: SetupStage,
    pair_verify: Option<PairVerify>,
    verify_stage: VerifyStage,
    setup_outcome: Option<PairSetupOutcome>,
    session_keys: Option<SessionKeys>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupStage {
    NotStarted,
    WaitingM2,
    WaitingM4,
    WaitingM6,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerifyStage {
    NotStarted,
    WaitingPv2,
    WaitingPv4,
    Complete,
}

impl PairingSession {
    pub fn new(controller: ControllerIdentity) -> Self {
        Self {
            controller,
            pair_setup: None,
            setup_stage: SetupStage::NotStarted,
            pair_verify: None,
            verify_stage: VerifyStage::NotStarted,
            setup_outcome: None,
            session_keys: None,
        }
    }

    pub fn controller(&self) -> &ControllerIdentity {
        &self.controller
    }

    /// Start pair-setup; returns the M1 payload.
    pub fn start_pair_setup(&mut self, pin: &str) -> Result<Vec<u8>> {
        if self.pair_setup.is_some() || self.pair_verify.is_some() {
            return Err(Error::Pairing(PairingError::InvalidState(
                "A pairing exchange is already active",
            )));
        }

        let mut setup = PairSetup::new(self.controller.clone(), pin);
        let m1 = setup.start()?;
        self.pair_setup = Some(setup);
        self.setup_stage = SetupStage::WaitingM2;
        Ok(m1)
    }

    /// Feed the next pair-setup reply; returns the next payload to send, or
    /// `None` once the exchange is complete.
    pub fn continue_pair_setup(&mut self, response: &[u8]) -> Result<Option<Vec<u8>>> {
        let setup = self.pair_setup.as_mut().ok_or(Error::Pairing(
            PairingError::InvalidState("Pair-setup not started"),
        ))?;

        match self.setup_stage {
            SetupStage::WaitingM2 => {
                let m3 = setup.handle_m2(response)?;
                self.setup_stage = SetupStage::WaitingM4;
                Ok(Some(m3))
            }
            SetupStage::WaitingM4 => {
                let m5 = setup.handle_m4(response)?;
                self.setup_stage = SetupStage::WaitingM6;
                Ok(Some(m5))
            }
            SetupStage::WaitingM6 => {
                let outcome = setup.handle_m6(response)?;
                self.setup_outcome = Some(outcome);
                self.setup_stage = SetupStage::Complete;
                self.pair_setup = None;
                Ok(None)
            }
            _ => Err(Error::Pairing(PairingError::InvalidState(
                "Pair-setup is not waiting for a reply",
            ))),
        }
    }

    /// Take the accessory identity captured by a completed pair-setup.
    pub fn take_setup_outcome(&mut self) -> Option<PairSetupOutcome> {
        self.setup_outcome.take()
    }

    /// Start pair-verify from stored credentials; returns the PV1 payload.
    pub fn start_pair_verify(&mut self, server_ltpk: [u8; 32]) -> Result<Vec<u8>> {
        if self.pair_setup.is_some() || self.pair_verify.is_some() {
            return Err(Error::Pairing(PairingError::InvalidState(
                "A pairing exchange is already active",
            )));
        }

        let mut verify = PairVerify::new(self.controller.clone(), server_ltpk);
        let pv1 = verify.start()?;
        self.pair_verify = Some(verify);
        self.verify_stage = VerifyStage::WaitingPv2;
        Ok(pv1)
    }

    /// Feed the next pair-verify reply; returns the next payload to send, or
    /// `None` once the channel keys are installed.
    pub fn continue_pair_verify(&mut self, response: &[u8]) -> Result<Option<Vec<u8>>> {
        let verify = self.pair_verify.as_mut().ok_or(Error::Pairing(
            PairingError::InvalidState("Pair-verify not started"),
        ))?;

        match self.verify_stage {
            VerifyStage::WaitingPv2 => {
                let pv3 = verify.handle_pv2(response)?;
                self.verify_stage = VerifyStage::WaitingPv4;
                Ok(Some(pv3))
            }
            VerifyStage::WaitingPv4 => {
                let keys = verify.handle_pv4(response)?;
                self.session_keys = Some(keys);
                self.verify_stage = VerifyStage::Complete;
                self.pair_verify = None;
                Ok(None)
            }
            _ => Err(Error::Pairing(PairingError::InvalidState(
                "Pair-verify is not waiting for a reply",
            ))),
        }
    }

    /// Take the channel keys derived by a completed pair-verify.
    pub fn take_session_keys(&mut self) -> Option<SessionKeys> {
        self.session_keys.take()
    }
}
