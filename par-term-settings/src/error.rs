//! Typed error variants for the par-term-settings crate.
//!
//! Codec and schema-verification failures have their own enums
//! ([`crate::codec::CodecError`], [`crate::verify::SchemaError`]); this module
//! covers everything a store or schema loader can report.

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;

/// Errors raised by stores, schema loading and value conversion.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A type signature string could not be parsed.
    #[error("Invalid type signature '{signature}': {reason}")]
    InvalidSignature {
        /// The offending signature text.
        signature: String,
        /// What went wrong while parsing it.
        reason: String,
    },

    /// A value did not have the shape its declared type requires.
    #[error("Value does not match type '{expected}': {reason}")]
    InvalidValue {
        /// Signature of the type the value should have had.
        expected: String,
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// A key path is syntactically invalid for the requested operation.
    #[error("Invalid settings path '{0}'")]
    InvalidPath(String),

    /// The key is not writable (locked by policy or by the schema).
    #[error("Key '{0}' is not writable")]
    NotWritable(String),

    /// A write fell outside the key's declared range.
    #[error("Value {value} is outside the range of '{key}'")]
    OutOfRange {
        /// Full key path.
        key: String,
        /// Display form of the rejected value.
        value: String,
    },

    /// No schema covers the key.
    #[error("No schema defines key '{0}'")]
    UnknownKey(String),

    /// A schema file referenced something that does not exist or is malformed.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A schema id was requested that no source provides.
    #[error("Schema '{0}' is not installed")]
    SchemaNotFound(String),

    /// An I/O error while reading or writing a file.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File that could not be accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A YAML document could not be parsed or serialized.
    #[error("YAML error in '{path}': {source}")]
    Yaml {
        /// File being processed.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// A stored payload failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl SettingsError {
    pub(crate) fn invalid_value(expected: impl ToString, reason: impl Into<String>) -> Self {
        SettingsError::InvalidValue {
            expected: expected.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SettingsError::Io {
            path: path.into(),
            source,
        }
    }
}
