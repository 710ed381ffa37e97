//! Error types for the Companion protocol engine.

use thiserror::Error;

/// Primary error type for all Companion operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("OPACK error: {0}")]
    Opack(#[from] OpackError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,
}

/// Errors during mDNS service discovery.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("mDNS daemon error: {0}")]
    Daemon(String),

    #[error("Service resolution failed: {0}")]
    Resolution(String),

    #[error("No Apple TVs found")]
    NoDevicesFound,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

/// Pairing rejection reason carried in the TLV `error` tag.
///
/// The accessory's code is surfaced verbatim; `BackOff` additionally carries
/// the retry delay from the `retryDelay` tag when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Unknown,
    Authentication,
    BackOff,
    MaxPeers,
    MaxTries,
    Unavailable,
    Busy,
}

impl RejectReason {
    /// Map a raw TLV error code to a reason. Unrecognised codes fold to `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x02 => Self::Authentication,
            0x03 => Self::BackOff,
            0x04 => Self::MaxPeers,
            0x05 => Self::MaxTries,
            0x06 => Self::Unavailable,
            0x07 => Self::Busy,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Authentication => "authentication (wrong PIN)",
            Self::BackOff => "back off",
            Self::MaxPeers => "max peers",
            Self::MaxTries => "max tries",
            Self::Unavailable => "unavailable",
            Self::Busy => "busy",
        };
        f.write_str(s)
    }
}

/// Errors during pair-setup and pair-verify.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Pairing rejected by device: {reason}")]
    Rejected {
        reason: RejectReason,
        retry_delay: Option<u16>,
    },

    #[error("Invalid server public key")]
    InvalidServerKey,

    #[error("SRP proof mismatch")]
    ProofMismatch,

    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Unexpected sequence number: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedSequence { expected: u8, actual: u8 },

    #[error("Missing required TLV tag: {0:#04x}")]
    MissingTag(u8),

    #[error("Invalid pairing state: {0}")]
    InvalidState(&'static str),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: authentication tag mismatch")]
    Decryption,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Nonce counter exhausted")]
    CounterExhausted,
}

/// OPACK codec errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OpackError {
    #[error("Insufficient data: needed {needed} more bytes")]
    InsufficientData { needed: usize },

    #[error("Invalid UTF-8 in string value")]
    InvalidUtf8,

    #[error("Unsupported value for encoding")]
    UnsupportedType,

    #[error("Unsupported marker byte: {0:#04x}")]
    UnsupportedMarker(u8),

    #[error("Trailing data after value: {0} bytes")]
    TrailingData(usize),
}

/// Companion wire-frame errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    #[error("Corrupt frame length: {0}")]
    InvalidLength(u32),
}

/// Parsing errors for TXT records and stored documents.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Session-level errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("No text field is focused")]
    NotFocused,

    #[error("Transport closed by peer")]
    TransportClosed,

    #[error("Session not verified")]
    NotVerified,

    #[error("No credentials stored for device: {0}")]
    NoCredentials(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_maps_all_codes() {
        assert_eq!(RejectReason::from_code(0x01), RejectReason::Unknown);
        assert_eq!(RejectReason::from_code(0x02), RejectReason::Authentication);
        assert_eq!(RejectReason::from_code(0x03), RejectReason::BackOff);
        assert_eq!(RejectReason::from_code(0x04), RejectReason::MaxPeers);
        assert_eq!(RejectReason::from_code(0x05), RejectReason::MaxTries);
        assert_eq!(RejectReason::from_code(0x06), RejectReason::Unavailable);
        assert_eq!(RejectReason::from_code(0x07), RejectReason::Busy);
        assert_eq!(RejectReason::from_code(0xAA), RejectReason::Unknown);
    }

    #[test]
    fn rejected_error_carries_retry_delay() {
        let err = PairingError::Rejected {
            reason: RejectReason::BackOff,
            retry_delay: Some(30),
        };
        assert!(err.to_string().contains("back off"));
        match err {
            PairingError::Rejected { retry_delay, .. } => assert_eq!(retry_delay, Some(30)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error as StdError;

        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "test");
        let err = Error::Connection(io_err);
        assert!(err.source().is_some());

        let err = Error::Pairing(PairingError::ProofMismatch);
        assert!(err.source().is_some());
    }

    #[test]
    fn error_conversions() {
        let err: Error = DiscoveryError::NoDevicesFound.into();
        assert!(matches!(err, Error::Discovery(_)));

        let err: Error = OpackError::UnsupportedMarker(0x34).into();
        assert!(matches!(err, Error::Opack(_)));

        let err: Error = FrameError::UnknownFrameType(0x7F).into();
        assert!(matches!(err, Error::Frame(_)));

        let err: Error = SessionError::NotFocused.into();
        assert!(matches!(err, Error::Session(_)));
    }
}
