//! Binary codec for optional settings values.
//!
//! Every value crossing the bridge, including "no value", is framed as:
//!
//! ```text
//! +------------+---------+----------+-----------+-----------+--------+
//! | total: u32 | ver: u8 | pres: u8 | slen: u16 | signature | body   |
//! +------------+---------+----------+-----------+-----------+--------+
//! ```
//!
//! All integers are little-endian. `total` counts every byte after itself.
//! `pres` is `0` for an absent value (signature and body empty) and `1` for a
//! present one. The body layout follows the signature:
//!
//! - fixed-width scalars in their natural width, booleans as one byte `0`/`1`
//! - strings and byte strings as `u32` length followed by the bytes
//! - arrays as `u32` count followed by the items
//! - dictionaries as `u32` count followed by `key, value` pairs in strictly
//!   increasing key order
//! - tuples as their members back to back
//! - maybes as a `0`/`1` tag followed by the inner value when present
//!
//! Decoding is strict: trailing bytes, unsorted dictionary keys, invalid
//! UTF-8 and over-deep nesting are all rejected.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::value::{MAX_NESTING, Value, ValueType};

/// Current frame version.
pub const CODEC_VERSION: u8 = 1;

/// Upper bound on a single array or dictionary count.
pub const MAX_ELEMENTS: u32 = 1 << 20;

const HEADER_LEN: usize = 4;

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload truncated")]
    Truncated,
    #[error("frame length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("unsupported codec version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid presence marker {0}")]
    InvalidPresence(u8),
    #[error("invalid boolean byte {0}")]
    InvalidBool(u8),
    #[error("invalid maybe tag {0}")]
    InvalidMaybeTag(u8),
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid type signature '{0}'")]
    InvalidSignature(String),
    #[error("dictionary keys out of order or duplicated")]
    UnorderedKeys,
    #[error("value nested deeper than {MAX_NESTING} levels")]
    TooDeep,
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("payload exceeds encodable size")]
    TooLarge,
    #[error("type mismatch: expected '{expected}', found '{found}'")]
    TypeMismatch { expected: String, found: String },
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode an optional value into a self-describing frame.
pub fn encode(value: Option<&Value>) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&[0; HEADER_LEN]);
    out.push(CODEC_VERSION);
    match value {
        None => {
            out.push(0);
            out.extend_from_slice(&0u16.to_le_bytes());
        }
        Some(v) => {
            let ty = v.value_type();
            if ty.depth() > MAX_NESTING {
                return Err(CodecError::TooDeep);
            }
            let signature = ty.signature();
            let sig_len = u16::try_from(signature.len()).map_err(|_| CodecError::TooLarge)?;
            out.push(1);
            out.extend_from_slice(&sig_len.to_le_bytes());
            out.extend_from_slice(signature.as_bytes());
            put_value(&mut out, v)?;
        }
    }
    let total = u32::try_from(out.len() - HEADER_LEN).map_err(|_| CodecError::TooLarge)?;
    out[..HEADER_LEN].copy_from_slice(&total.to_le_bytes());
    Ok(out)
}

fn put_len(out: &mut Vec<u8>, len: usize) -> Result<(), CodecError> {
    let len = u32::try_from(len).map_err(|_| CodecError::TooLarge)?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CodecError> {
    put_len(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn put_value(out: &mut Vec<u8>, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Bool(b) => out.push(u8::from(*b)),
        Value::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::UInt64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::String(s) => put_bytes(out, s.as_bytes())?,
        Value::Bytes(b) => put_bytes(out, b)?,
        Value::Tuple(members) => {
            for m in members {
                put_value(out, m)?;
            }
        }
        Value::Array { items, .. } => {
            put_len(out, items.len())?;
            for item in items {
                put_value(out, item)?;
            }
        }
        Value::Dict { entries, .. } => {
            put_len(out, entries.len())?;
            for (k, v) in entries {
                put_bytes(out, k.as_bytes())?;
                put_value(out, v)?;
            }
        }
        Value::Maybe { value: None, .. } => out.push(0),
        Value::Maybe {
            value: Some(inner), ..
        } => {
            out.push(1);
            put_value(out, inner)?;
        }
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_count(&mut self) -> Result<usize, CodecError> {
        let count = self.read_u32()?;
        if count > MAX_ELEMENTS {
            return Err(CodecError::TooLarge);
        }
        Ok(count as usize)
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_u32()? as usize;
        self.read_exact(len)
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_len_prefixed()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

/// Decode a frame produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Option<Value>, CodecError> {
    let mut cur = Cursor::new(bytes);
    let declared = cur.read_u32()?;
    let actual = cur.remaining();
    if declared as usize != actual {
        return Err(CodecError::LengthMismatch { declared, actual });
    }
    let version = cur.read_u8()?;
    if version != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let presence = cur.read_u8()?;
    let sig_len = cur.read_u16()? as usize;
    let value = match presence {
        0 => {
            if sig_len != 0 {
                return Err(CodecError::InvalidSignature(
                    "absent value carries a signature".to_string(),
                ));
            }
            None
        }
        1 => {
            let sig_bytes = cur.read_exact(sig_len)?;
            let sig = std::str::from_utf8(sig_bytes).map_err(|_| CodecError::InvalidUtf8)?;
            let ty = ValueType::parse(sig)
                .map_err(|_| CodecError::InvalidSignature(sig.to_string()))?;
            Some(read_value(&mut cur, &ty, 0)?)
        }
        other => return Err(CodecError::InvalidPresence(other)),
    };
    if cur.remaining() != 0 {
        return Err(CodecError::TrailingBytes(cur.remaining()));
    }
    Ok(value)
}

/// Decode a frame and require a present value to have type `expected`.
///
/// An absent value is accepted for any expected type.
pub fn decode_expecting(bytes: &[u8], expected: &ValueType) -> Result<Option<Value>, CodecError> {
    let value = decode(bytes)?;
    if let Some(v) = &value {
        let found = v.value_type();
        if &found != expected {
            return Err(CodecError::TypeMismatch {
                expected: expected.signature(),
                found: found.signature(),
            });
        }
    }
    Ok(value)
}

fn read_value(cur: &mut Cursor<'_>, ty: &ValueType, depth: usize) -> Result<Value, CodecError> {
    if depth > MAX_NESTING {
        return Err(CodecError::TooDeep);
    }
    let value = match ty {
        ValueType::Bool => match cur.read_u8()? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(CodecError::InvalidBool(other)),
        },
        ValueType::Int16 => Value::Int16(i16::from_le_bytes(cur.read_array()?)),
        ValueType::UInt16 => Value::UInt16(u16::from_le_bytes(cur.read_array()?)),
        ValueType::Int32 => Value::Int32(i32::from_le_bytes(cur.read_array()?)),
        ValueType::UInt32 => Value::UInt32(u32::from_le_bytes(cur.read_array()?)),
        ValueType::Int64 => Value::Int64(i64::from_le_bytes(cur.read_array()?)),
        ValueType::UInt64 => Value::UInt64(u64::from_le_bytes(cur.read_array()?)),
        ValueType::Double => Value::Double(f64::from_bits(u64::from_le_bytes(cur.read_array()?))),
        ValueType::String => Value::String(cur.read_string()?),
        ValueType::Bytes => Value::Bytes(cur.read_len_prefixed()?.to_vec()),
        ValueType::Tuple(members) => Value::Tuple(
            members
                .iter()
                .map(|m| read_value(cur, m, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        ValueType::Array(element) => {
            let count = cur.read_count()?;
            let mut items = Vec::with_capacity(count.min(cur.remaining()));
            for _ in 0..count {
                items.push(read_value(cur, element, depth + 1)?);
            }
            Value::Array {
                element_type: (**element).clone(),
                items,
            }
        }
        ValueType::Dict(value_type) => {
            let count = cur.read_count()?;
            let mut entries = BTreeMap::new();
            let mut last: Option<String> = None;
            for _ in 0..count {
                let key = cur.read_string()?;
                if last.as_deref().is_some_and(|prev| prev >= key.as_str()) {
                    return Err(CodecError::UnorderedKeys);
                }
                let value = read_value(cur, value_type, depth + 1)?;
                last = Some(key.clone());
                entries.insert(key, value);
            }
            Value::Dict {
                value_type: (**value_type).clone(),
                entries,
            }
        }
        ValueType::Maybe(inner) => match cur.read_u8()? {
            0 => Value::nothing((**inner).clone()),
            1 => Value::Maybe {
                inner_type: (**inner).clone(),
                value: Some(Box::new(read_value(cur, inner, depth + 1)?)),
            },
            other => return Err(CodecError::InvalidMaybeTag(other)),
        },
    };
    Ok(value)
}
