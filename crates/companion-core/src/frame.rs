//! Companion wire framing.
//!
//! Each frame is `[length: u32 BE][type: u8][flags: u8][payload]`, where
//! `length` counts the bytes that follow it (type + flags + payload). During
//! pairing the payload is TLV8; once the session is established it is
//! OPACK, sealed by the channel cipher.

use crate::error::FrameError;

/// Frame header size: 4-byte length + type + flags.
const HEADER_LEN: usize = 6;

/// Upper bound on a single frame payload. Anything larger is treated as a
/// corrupted length field rather than a legitimate message.
const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// Companion frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    PairSetupStart = 0x01,
    PairSetupNext = 0x02,
    PairVerifyStart = 0x03,
    PairVerifyNext = 0x04,
    Event = 0x06,
}

impl FrameType {
    /// Convert from the wire byte.
    pub fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            0x01 => Ok(Self::PairSetupStart),
            0x02 => Ok(Self::PairSetupNext),
            0x03 => Ok(Self::PairVerifyStart),
            0x04 => Ok(Self::PairVerifyNext),
            0x06 => Ok(Self::Event),
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }

    /// Whether this frame belongs to a pairing exchange.
    pub fn is_pairing(&self) -> bool {
        !matches!(self, Self::Event)
    }
}

/// A single Companion frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            flags: 0,
            payload,
        }
    }

    /// Serialise to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let length = (self.payload.len() + 2) as u32;
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&length.to_be_bytes());
        out.push(self.frame_type as u8);
        out.push(self.flags);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Streaming frame decoder.
///
/// Bytes arriving from the transport are appended with [`extend`]; complete
/// frames are drained with [`next_frame`]. Partial frames stay buffered, so
/// no bytes are ever lost across calls.
///
/// [`extend`]: FrameBuffer::extend
/// [`next_frame`]: FrameBuffer::next_frame
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if length < 2 || length > MAX_FRAME_LEN {
            return Err(FrameError::InvalidLength(length));
        }

        let total = 4 + length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let frame_type = FrameType::from_byte(self.buf[4])?;
        let flags = self.buf[5];
        let payload = self.buf[HEADER_LEN..total].to_vec();
        self.buf.drain(..total);

        Ok(Some(Frame {
            frame_type,
            flags,
            payload,
        }))
    }

    /// Drain every complete frame, leaving the residual bytes buffered.
    pub fn drain_frames(&mut self) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Residual byte count still buffered.
    pub fn residual_len(&self) -> usize {
        self.buf.len()
    }
}
