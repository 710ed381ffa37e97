//! # companion-pairing
//!
//! HomeKit authentication for the Companion link.
//!
//! This crate implements:
//! - Pair-setup (SRP-6a based, M1-M6) producing long-term credentials
//! - Pair-verify (X25519 + Ed25519, PV1-PV4) producing channel keys
//! - The controller identity used across both exchanges

mod controller;
mod pair_setup;
mod pair_verify;
mod session;

pub use controller::ControllerIdentity;
pub use pair_setup::{PairSetup, PairSetupOutcome};
pub use pair_verify::PairVerify;
pub use session::PairingSession;
