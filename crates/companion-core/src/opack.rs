//! OPACK encoding/decoding for Companion payloads.
//!
//! OPACK is Apple's self-describing object-packing format: every value is
//! prefixed by a single marker byte. Small integers, short strings, and short
//! byte blobs carry their payload length in the marker itself; larger forms
//! use a little-endian length prefix. Containers are either counted (low
//! nibble of the marker) or "endless", terminated by `0x03`.

use crate::error::OpackError;
use std::collections::BTreeMap;

/// End-of-endless-container sentinel.
const TERMINATOR: u8 = 0x03;

/// A decoded OPACK value.
///
/// Map keys are always strings; the typed representation makes non-string
/// keys unrepresentable, so encoding cannot produce them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    /// 16-byte UUID (marker `0x05`).
    Uuid([u8; 16]),
}

impl Value {
    /// Build a dictionary from key/value pairs.
    pub fn dict<K, I>(pairs: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Dict(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Encode to OPACK bytes.
    pub fn encode(&self) -> Result<Vec<u8>, OpackError> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), OpackError> {
        match self {
            Value::Null => out.push(0x04),
            Value::Bool(true) => out.push(0x01),
            Value::Bool(false) => out.push(0x02),
            Value::Uuid(bytes) => {
                out.push(0x05);
                out.extend_from_slice(bytes);
            }
            Value::Int(v) => encode_int(*v, out),
            Value::Float32(v) => {
                out.push(0x35);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float64(v) => {
                out.push(0x36);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::String(s) => encode_string(s, out),
            Value::Bytes(b) => encode_bytes(b, out),
            Value::Array(items) => {
                if items.len() <= 14 {
                    out.push(0xD0 + items.len() as u8);
                    for item in items {
                        item.encode_into(out)?;
                    }
                } else {
                    out.push(0xDF);
                    for item in items {
                        item.encode_into(out)?;
                    }
                    out.push(TERMINATOR);
                }
            }
            Value::Dict(entries) => {
                if entries.len() <= 14 {
                    out.push(0xE0 + entries.len() as u8);
                    for (key, value) in entries {
                        encode_string(key, out);
                        value.encode_into(out)?;
                    }
                } else {
                    out.push(0xEF);
                    for (key, value) in entries {
                        encode_string(key, out);
                        value.encode_into(out)?;
                    }
                    out.push(TERMINATOR);
                }
            }
        }
        Ok(())
    }

    /// Decode a single value consuming the whole buffer.
    pub fn decode(data: &[u8]) -> Result<Value, OpackError> {
        let (value, consumed) = Self::decode_prefix(data)?;
        if consumed != data.len() {
            return Err(OpackError::TrailingData(data.len() - consumed));
        }
        Ok(value)
    }

    /// Decode a single value from the start of the buffer, returning the
    /// number of bytes consumed.
    pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), OpackError> {
        let mut decoder = Decoder { data, pos: 0 };
        let value = decoder.decode_value()?;
        Ok((value, decoder.pos))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a key in a dictionary value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// Integers 0..=39 must use the inline marker form; wider values take the
/// smallest little-endian form that fits. Negative values use the 8-byte
/// form with two's-complement representation.
fn encode_int(v: i64, out: &mut Vec<u8>) {
    if (0..=39).contains(&v) {
        out.push(0x08 + v as u8);
    } else if v < 0 {
        out.push(0x33);
        out.extend_from_slice(&v.to_le_bytes());
    } else if v <= u8::MAX as i64 {
        out.push(0x30);
        out.push(v as u8);
    } else if v <= u16::MAX as i64 {
        out.push(0x31);
        out.extend_from_slice(&(v as u16).to_le_bytes());
    } else if v <= u32::MAX as i64 {
        out.push(0x32);
        out.extend_from_slice(&(v as u32).to_le_bytes());
    } else {
        out.push(0x33);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn encode_string(s: &str, out: &mut Vec<u8>) {
    let len = s.len();
    if len <= 32 {
        out.push(0x40 + len as u8);
    } else if len <= 0xFF {
        out.push(0x61);
        out.push(len as u8);
    } else if len <= 0xFFFF {
        out.push(0x62);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else if len <= 0xFF_FFFF {
        out.push(0x63);
        out.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
    } else {
        out.push(0x64);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(s.as_bytes());
}

fn encode_bytes(b: &[u8], out: &mut Vec<u8>) {
    let len = b.len();
    if len <= 32 {
        out.push(0x70 + len as u8);
    } else if len <= 0xFF {
        out.push(0x91);
        out.push(len as u8);
    } else if len <= 0xFFFF {
        out.push(0x92);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else if len <= 0xFFFF_FFFF {
        out.push(0x93);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    } else {
        out.push(0x94);
        out.extend_from_slice(&(len as u64).to_le_bytes());
    }
    out.extend_from_slice(b);
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], OpackError> {
        if self.pos + n > self.data.len() {
            return Err(OpackError::InsufficientData {
                needed: self.pos + n - self.data.len(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_byte(&mut self) -> Result<u8, OpackError> {
        Ok(self.take(1)?[0])
    }

    fn peek(&self) -> Result<u8, OpackError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(OpackError::InsufficientData { needed: 1 })
    }

    fn take_string(&mut self, len: usize) -> Result<Value, OpackError> {
        let raw = self.take(len)?;
        let s = std::str::from_utf8(raw).map_err(|_| OpackError::InvalidUtf8)?;
        Ok(Value::String(s.to_string()))
    }

    /// Little-endian unsigned integer of `width` bytes (width <= 8).
    fn take_uint(&mut self, width: usize) -> Result<u64, OpackError> {
        let raw = self.take(width)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn decode_value(&mut self) -> Result<Value, OpackError> {
        let marker = self.take_byte()?;
        match marker {
            0x01 => Ok(Value::Bool(true)),
            0x02 => Ok(Value::Bool(false)),
            0x04 => Ok(Value::Null),
            0x05 => {
                let raw = self.take(16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(raw);
                Ok(Value::Uuid(uuid))
            }
            0x08..=0x2F => Ok(Value::Int((marker - 0x08) as i64)),
            0x30..=0x32 => {
                let width = 1usize << (marker - 0x30);
                Ok(Value::Int(self.take_uint(width)? as i64))
            }
            0x33 => {
                let raw = self.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                Ok(Value::Int(i64::from_le_bytes(buf)))
            }
            0x35 => {
                let raw = self.take(4)?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(raw);
                Ok(Value::Float32(f32::from_le_bytes(buf)))
            }
            0x36 => {
                let raw = self.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                Ok(Value::Float64(f64::from_le_bytes(buf)))
            }
            0x40..=0x60 => self.take_string((marker - 0x40) as usize),
            0x61..=0x64 => {
                let width = (marker - 0x60) as usize;
                let len = self.take_uint(width)? as usize;
                self.take_string(len)
            }
            0x70..=0x90 => {
                let len = (marker - 0x70) as usize;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            0x91..=0x94 => {
                // Length-field width is 1 << ((marker & 0x0F) - 1): 1, 2, 4, 8.
                let width = 1usize << ((marker & 0x0F) - 1);
                let len = self.take_uint(width)? as usize;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            0xD0..=0xDF => {
                let mut items = Vec::new();
                if marker == 0xDF {
                    while self.peek()? != TERMINATOR {
                        items.push(self.decode_value()?);
                    }
                    self.pos += 1;
                } else {
                    for _ in 0..(marker - 0xD0) {
                        items.push(self.decode_value()?);
                    }
                }
                Ok(Value::Array(items))
            }
            0xE0..=0xEF => {
                let mut entries = BTreeMap::new();
                if marker == 0xEF {
                    while self.peek()? != TERMINATOR {
                        let (key, value) = self.decode_entry()?;
                        entries.insert(key, value);
                    }
                    self.pos += 1;
                } else {
                    for _ in 0..(marker - 0xE0) {
                        let (key, value) = self.decode_entry()?;
                        entries.insert(key, value);
                    }
                }
                Ok(Value::Dict(entries))
            }
            other => Err(OpackError::UnsupportedMarker(other)),
        }
    }

    fn decode_entry(&mut self) -> Result<(String, Value), OpackError> {
        let key = match self.decode_value()? {
            Value::String(s) => s,
            // Map keys must be strings.
            _ => return Err(OpackError::UnsupportedType),
        };
        let value = self.decode_value()?;
        Ok((key, value))
    }
}
