//! # companion-core
//!
//! Core types, binary codecs, and error definitions shared across the
//! Companion-link crates.
//!
//! This crate provides:
//! - Device representation and identification
//! - The OPACK object codec used by Companion payloads
//! - The Companion wire-frame codec with streaming decode
//! - Common error types

pub mod device;
pub mod error;
pub mod frame;
pub mod opack;

pub use device::{Device, DeviceId};
pub use error::{
    CryptoError, DiscoveryError, Error, FrameError, OpackError, PairingError, ParseError,
    RejectReason, Result, SessionError,
};
pub use frame::{Frame, FrameBuffer, FrameType};
pub use opack::Value;
