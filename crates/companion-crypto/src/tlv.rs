//! TLV8 encoding/decoding for HomeKit pairing messages.
//!
//! TLV8 format: [Tag: 1 byte][Length: 1 byte][Value: 0-255 bytes].
//! Values longer than 255 bytes are fragmented across consecutive
//! same-tag items; decode concatenates them back.

use std::collections::HashMap;

/// TLV tag constants for HomeKit pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvTag {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Signature = 0x0A,
    Flags = 0x13,
}

/// Parsed TLV8 message.
#[derive(Debug, Clone, Default)]
pub struct Tlv8 {
    items: HashMap<u8, Vec<u8>>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TLV8 from bytes.
    ///
    /// Consecutive items with the same tag are concatenated (fragmented
    /// values). A truncated trailing item terminates the walk silently and
    /// whatever was assembled so far is returned; callers treat a missing
    /// mandatory tag as the protocol error.
    pub fn parse(data: &[u8]) -> Self {
        let mut items: HashMap<u8, Vec<u8>> = HashMap::new();
        let mut last_tag: Option<u8> = None;
        let mut i = 0;

        while i + 2 <= data.len() {
            let tag = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                break;
            }
            let value = &data[i..i + len];
            i += len;

            if Some(tag) == last_tag {
                if let Some(existing) = items.get_mut(&tag) {
                    existing.extend_from_slice(value);
                }
            } else {
                items.entry(tag).or_default().extend_from_slice(value);
            }
            last_tag = Some(tag);
        }

        Self { items }
    }

    /// Encode to bytes.
    ///
    /// Tags are emitted in ascending order; values > 255 bytes are split
    /// into consecutive same-tag chunks. Only the final chunk of a tag may
    /// be shorter than 255 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut tags: Vec<_> = self.items.keys().copied().collect();
        tags.sort_unstable();

        let mut out = Vec::new();
        for tag in tags {
            let value = &self.items[&tag];
            if value.is_empty() {
                out.push(tag);
                out.push(0);
            } else {
                for chunk in value.chunks(255) {
                    out.push(tag);
                    out.push(chunk.len() as u8);
                    out.extend_from_slice(chunk);
                }
            }
        }
        out
    }

    /// Get value for tag.
    pub fn get(&self, tag: TlvTag) -> Option<&[u8]> {
        self.items.get(&(tag as u8)).map(|v| v.as_slice())
    }

    /// Set value for tag.
    pub fn set(&mut self, tag: TlvTag, value: impl Into<Vec<u8>>) {
        self.items.insert(tag as u8, value.into());
    }

    /// Check if tag is present.
    pub fn contains(&self, tag: TlvTag) -> bool {
        self.items.contains_key(&(tag as u8))
    }

    /// Get the sequence number (`State` tag, single byte).
    pub fn state(&self) -> Option<u8> {
        self.get(TlvTag::State).and_then(|v| v.first().copied())
    }

    /// Get the error code (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvTag::Error).and_then(|v| v.first().copied())
    }

    /// Get the retry delay in seconds (little-endian, 1-2 bytes).
    pub fn retry_delay(&self) -> Option<u16> {
        self.get(TlvTag::RetryDelay).map(|v| match v.len() {
            0 => 0,
            1 => v[0] as u16,
            _ => u16::from_le_bytes([v[0], v[1]]),
        })
    }
}
