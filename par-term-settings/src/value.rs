//! Dynamically-typed settings values and their type signatures.
//!
//! A [`ValueType`] is written as a compact signature string:
//!
//! | Signature | Type                         |
//! |-----------|------------------------------|
//! | `b`       | boolean                      |
//! | `n` `q`   | signed / unsigned 16-bit int |
//! | `i` `u`   | signed / unsigned 32-bit int |
//! | `x` `t`   | signed / unsigned 64-bit int |
//! | `d`       | IEEE-754 double              |
//! | `s`       | UTF-8 string                 |
//! | `ay`      | byte string                  |
//! | `(..)`    | tuple of the enclosed types  |
//! | `aT`      | array of `T`                 |
//! | `a{sT}`   | dictionary, string keys      |
//! | `mT`      | optional `T`                 |
//!
//! Values compare structurally; doubles compare by bit pattern so a `NaN`
//! that went over the wire still equals itself.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::SettingsError;

/// Maximum container nesting accepted by [`ValueType::parse`] and the codec.
pub const MAX_NESTING: usize = 64;

// ============================================================================
// ValueType
// ============================================================================

/// The type of a [`Value`], mirroring its signature string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    Bytes,
    Tuple(Vec<ValueType>),
    Array(Box<ValueType>),
    /// Dictionary with string keys and values of the boxed type.
    Dict(Box<ValueType>),
    Maybe(Box<ValueType>),
}

impl ValueType {
    /// Parse a complete signature string such as `a{sas}` or `m(ii)`.
    pub fn parse(signature: &str) -> Result<Self, SettingsError> {
        let bytes = signature.as_bytes();
        let mut pos = 0;
        let ty = parse_one(bytes, &mut pos, 0).map_err(|reason| {
            SettingsError::InvalidSignature {
                signature: signature.to_string(),
                reason,
            }
        })?;
        if pos != bytes.len() {
            return Err(SettingsError::InvalidSignature {
                signature: signature.to_string(),
                reason: format!("unexpected trailing characters at offset {pos}"),
            });
        }
        Ok(ty)
    }

    /// The signature string for this type.
    pub fn signature(&self) -> String {
        self.to_string()
    }

    pub fn array_of(element: ValueType) -> Self {
        ValueType::Array(Box::new(element))
    }

    pub fn dict_of(value: ValueType) -> Self {
        ValueType::Dict(Box::new(value))
    }

    pub fn maybe_of(inner: ValueType) -> Self {
        ValueType::Maybe(Box::new(inner))
    }

    /// True for the integer and floating-point scalar types.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Int16
                | ValueType::UInt16
                | ValueType::Int32
                | ValueType::UInt32
                | ValueType::Int64
                | ValueType::UInt64
                | ValueType::Double
        )
    }

    /// Container depth of the type; scalars have depth 0.
    pub fn depth(&self) -> usize {
        match self {
            ValueType::Tuple(members) => {
                1 + members.iter().map(ValueType::depth).max().unwrap_or(0)
            }
            ValueType::Array(inner) | ValueType::Dict(inner) | ValueType::Maybe(inner) => {
                1 + inner.depth()
            }
            _ => 0,
        }
    }
}

fn parse_one(sig: &[u8], pos: &mut usize, depth: usize) -> Result<ValueType, String> {
    if depth > MAX_NESTING {
        return Err(format!("nesting deeper than {MAX_NESTING} levels"));
    }
    let Some(&c) = sig.get(*pos) else {
        return Err("signature ended early".to_string());
    };
    *pos += 1;
    let ty = match c {
        b'b' => ValueType::Bool,
        b'n' => ValueType::Int16,
        b'q' => ValueType::UInt16,
        b'i' => ValueType::Int32,
        b'u' => ValueType::UInt32,
        b'x' => ValueType::Int64,
        b't' => ValueType::UInt64,
        b'd' => ValueType::Double,
        b's' => ValueType::String,
        b'm' => ValueType::Maybe(Box::new(parse_one(sig, pos, depth + 1)?)),
        b'a' => match sig.get(*pos) {
            Some(b'y') => {
                *pos += 1;
                ValueType::Bytes
            }
            Some(b'{') => {
                *pos += 1;
                if sig.get(*pos) != Some(&b's') {
                    return Err("dictionary keys must be strings".to_string());
                }
                *pos += 1;
                let value = parse_one(sig, pos, depth + 1)?;
                if sig.get(*pos) != Some(&b'}') {
                    return Err("unterminated dictionary entry".to_string());
                }
                *pos += 1;
                ValueType::Dict(Box::new(value))
            }
            _ => ValueType::Array(Box::new(parse_one(sig, pos, depth + 1)?)),
        },
        b'(' => {
            let mut members = Vec::new();
            loop {
                match sig.get(*pos) {
                    Some(b')') => {
                        *pos += 1;
                        break;
                    }
                    Some(_) => members.push(parse_one(sig, pos, depth + 1)?),
                    None => return Err("unterminated tuple".to_string()),
                }
            }
            ValueType::Tuple(members)
        }
        other => {
            return Err(format!(
                "unknown type character '{}' at offset {}",
                char::from(other),
                *pos - 1
            ));
        }
    };
    Ok(ty)
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => f.write_str("b"),
            ValueType::Int16 => f.write_str("n"),
            ValueType::UInt16 => f.write_str("q"),
            ValueType::Int32 => f.write_str("i"),
            ValueType::UInt32 => f.write_str("u"),
            ValueType::Int64 => f.write_str("x"),
            ValueType::UInt64 => f.write_str("t"),
            ValueType::Double => f.write_str("d"),
            ValueType::String => f.write_str("s"),
            ValueType::Bytes => f.write_str("ay"),
            ValueType::Tuple(members) => {
                f.write_str("(")?;
                for m in members {
                    write!(f, "{m}")?;
                }
                f.write_str(")")
            }
            ValueType::Array(inner) => write!(f, "a{inner}"),
            ValueType::Dict(inner) => write!(f, "a{{s{inner}}}"),
            ValueType::Maybe(inner) => write!(f, "m{inner}"),
        }
    }
}

impl std::str::FromStr for ValueType {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValueType::parse(s)
    }
}

// ============================================================================
// Value
// ============================================================================

/// A typed settings value.
///
/// Containers carry their element type so that empty arrays, empty
/// dictionaries and `nothing` maybes still know what they are.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    Array {
        element_type: ValueType,
        items: Vec<Value>,
    },
    Dict {
        value_type: ValueType,
        entries: BTreeMap<String, Value>,
    },
    Maybe {
        inner_type: ValueType,
        value: Option<Box<Value>>,
    },
}

impl Value {
    /// Build an array, checking every item against `element_type`.
    pub fn array(element_type: ValueType, items: Vec<Value>) -> Result<Self, SettingsError> {
        if let Some(bad) = items.iter().find(|v| v.value_type() != element_type) {
            return Err(SettingsError::invalid_value(
                ValueType::array_of(element_type),
                format!("element has type '{}'", bad.value_type()),
            ));
        }
        Ok(Value::Array {
            element_type,
            items,
        })
    }

    /// Array of strings; the most common container in settings schemas.
    pub fn string_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Array {
            element_type: ValueType::String,
            items: items.into_iter().map(|s| Value::String(s.into())).collect(),
        }
    }

    /// Build a dictionary, checking every entry against `value_type`.
    pub fn dict(
        value_type: ValueType,
        entries: BTreeMap<String, Value>,
    ) -> Result<Self, SettingsError> {
        if let Some((key, bad)) = entries.iter().find(|(_, v)| v.value_type() != value_type) {
            return Err(SettingsError::invalid_value(
                ValueType::dict_of(value_type),
                format!("entry '{key}' has type '{}'", bad.value_type()),
            ));
        }
        Ok(Value::Dict {
            value_type,
            entries,
        })
    }

    pub fn just(value: Value) -> Self {
        Value::Maybe {
            inner_type: value.value_type(),
            value: Some(Box::new(value)),
        }
    }

    pub fn nothing(inner_type: ValueType) -> Self {
        Value::Maybe {
            inner_type,
            value: None,
        }
    }

    /// The type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int16(_) => ValueType::Int16,
            Value::UInt16(_) => ValueType::UInt16,
            Value::Int32(_) => ValueType::Int32,
            Value::UInt32(_) => ValueType::UInt32,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Tuple(members) => ValueType::Tuple(members.iter().map(Value::value_type).collect()),
            Value::Array { element_type, .. } => ValueType::array_of(element_type.clone()),
            Value::Dict { value_type, .. } => ValueType::dict_of(value_type.clone()),
            Value::Maybe { inner_type, .. } => ValueType::maybe_of(inner_type.clone()),
        }
    }

    /// Signature string of [`Self::value_type`].
    pub fn signature(&self) -> String {
        self.value_type().signature()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any signed integer, or an unsigned one that fits in `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int16(v) => Some(i64::from(*v)),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Items of an array value.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn as_strv(&self) -> Option<Vec<&str>> {
        self.as_array()?.iter().map(Value::as_str).collect()
    }

    /// Contents of a maybe value; `None` for `nothing` and for non-maybes.
    pub fn as_maybe(&self) -> Option<&Value> {
        match self {
            Value::Maybe { value, .. } => value.as_deref(),
            _ => None,
        }
    }

    /// Order two numeric scalars of the same type.
    ///
    /// Returns `None` when the types differ, the values are not numeric, or
    /// a double comparison involves `NaN`.
    pub fn compare_numeric(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int16(a), Value::Int16(b)) => Some(a.cmp(b)),
            (Value::UInt16(a), Value::UInt16(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::UInt32(a), Value::UInt32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::UInt64(a), Value::UInt64(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::UInt16(a), Value::UInt16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (
                Value::Array {
                    element_type: ta,
                    items: a,
                },
                Value::Array {
                    element_type: tb,
                    items: b,
                },
            ) => ta == tb && a == b,
            (
                Value::Dict {
                    value_type: ta,
                    entries: a,
                },
                Value::Dict {
                    value_type: tb,
                    entries: b,
                },
            ) => ta == tb && a == b,
            (
                Value::Maybe {
                    inner_type: ta,
                    value: a,
                },
                Value::Maybe {
                    inner_type: tb,
                    value: b,
                },
            ) => ta == tb && a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

// ----------------------------------------------------------------------------
// Text form
// ----------------------------------------------------------------------------

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("'")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int16(v) => write!(f, "int16 {v}"),
            Value::UInt16(v) => write!(f, "uint16 {v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "uint32 {v}"),
            Value::Int64(v) => write!(f, "int64 {v}"),
            Value::UInt64(v) => write!(f, "uint64 {v}"),
            Value::Double(v) => {
                if v.is_finite() && v.fract() == 0.0 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::String(s) => write_quoted(f, s),
            Value::Bytes(bytes) => {
                f.write_str("[byte")?;
                for (i, b) in bytes.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}0x{b:02x}")?;
                }
                f.write_str("]")
            }
            Value::Tuple(members) => {
                f.write_str("(")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{m}")?;
                }
                if members.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Value::Array {
                element_type,
                items,
            } => {
                if items.is_empty() {
                    return write!(f, "@a{element_type} []");
                }
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Dict {
                value_type,
                entries,
            } => {
                if entries.is_empty() {
                    return write!(f, "@a{{s{value_type}}} {{}}");
                }
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, k)?;
                    write!(f, ": {v}")?;
                }
                f.write_str("}")
            }
            Value::Maybe { value: None, .. } => f.write_str("nothing"),
            Value::Maybe {
                value: Some(inner), ..
            } => write!(f, "just {inner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signatures_roundtrip_text() {
        for sig in ["b", "n", "q", "i", "u", "x", "t", "d", "s", "ay", "as", "a{ss}", "(ii)", "m(sd)", "a{sas}", "mmb", "aay", "()"] {
            let ty = ValueType::parse(sig).expect(sig);
            assert_eq!(ty.signature(), sig);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for sig in ["", "z", "(ii", "a{is}", "a{ss", "ss", "m", "a"] {
            assert!(ValueType::parse(sig).is_err(), "{sig} should be rejected");
        }
    }

    #[test]
    fn test_parse_depth_limit() {
        let deep = "m".repeat(MAX_NESTING + 2) + "b";
        assert!(ValueType::parse(&deep).is_err());
        let ok = "a".repeat(10) + "s";
        assert_eq!(ValueType::parse(&ok).unwrap().depth(), 10);
    }

    #[test]
    fn test_double_equality_is_bitwise() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
    }

    #[test]
    fn test_array_constructor_checks_elements() {
        let err = Value::array(ValueType::String, vec![Value::Int32(1)]);
        assert!(err.is_err());
        let ok = Value::array(ValueType::Int32, vec![Value::Int32(1), Value::Int32(2)]).unwrap();
        assert_eq!(ok.signature(), "ai");
    }

    #[test]
    fn test_empty_containers_keep_type() {
        let empty = Value::string_array(Vec::<String>::new());
        assert_eq!(empty.signature(), "as");
        assert_ne!(
            empty,
            Value::Array {
                element_type: ValueType::Int32,
                items: vec![]
            }
        );
        assert_eq!(Value::nothing(ValueType::String).signature(), "ms");
    }

    #[test]
    fn test_display_text_form() {
        assert_eq!(Value::from("it's").to_string(), r"'it\'s'");
        assert_eq!(Value::Double(1.0).to_string(), "1.0");
        assert_eq!(Value::UInt32(7).to_string(), "uint32 7");
        assert_eq!(Value::string_array(["a", "b"]).to_string(), "['a', 'b']");
        assert_eq!(Value::string_array(Vec::<&str>::new()).to_string(), "@as []");
        assert_eq!(Value::just(Value::Bool(true)).to_string(), "just true");
        assert_eq!(Value::Tuple(vec![Value::Int32(80), Value::Int32(24)]).to_string(), "(80, 24)");
    }

    #[test]
    fn test_compare_numeric() {
        assert_eq!(Value::Int32(1).compare_numeric(&Value::Int32(2)), Some(Ordering::Less));
        assert_eq!(Value::Double(2.5).compare_numeric(&Value::Double(2.5)), Some(Ordering::Equal));
        assert_eq!(Value::Int32(1).compare_numeric(&Value::Int64(1)), None);
        assert_eq!(Value::from("a").compare_numeric(&Value::from("b")), None);
    }
}
