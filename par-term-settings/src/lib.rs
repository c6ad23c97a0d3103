//! Settings values, wire codec, schemas and storage for par-term.
//!
//! This crate holds everything the settings bridge needs that does not
//! involve a channel:
//!
//! - `value` / `yaml`: the dynamically-typed [`Value`] model and its YAML form
//! - `codec`: the framed binary encoding of optional values
//! - `schema`: schema files, discovery and key-path resolution
//! - `verify`: installed-versus-reference schema verification
//! - `store`: the [`SettingsStore`] contract
//! - `keyfile_store`: a YAML keyfile store implementing that contract

pub mod codec;
pub mod error;
pub mod keyfile_store;
pub mod schema;
pub mod store;
pub mod value;
pub mod verify;
pub mod yaml;

pub use codec::{CodecError, decode, decode_expecting, encode};
pub use error::SettingsError;
pub use keyfile_store::KeyfileStore;
pub use schema::{KeyRange, Mount, Schema, SchemaChild, SchemaKey, SchemaSource};
pub use store::{OriginTag, Permission, SettingsStore, StoreChange};
pub use value::{Value, ValueType};
pub use verify::{SchemaError, SchemaVerdict, SelectedSchemas, select_schema_source, verify_source};

/// Separator between path components of keys and directories.
pub const PATH_SEPARATOR: char = '/';

/// A key path: absolute, not a directory, no empty components.
pub fn is_key(path: &str) -> bool {
    path.starts_with(PATH_SEPARATOR) && !path.ends_with(PATH_SEPARATOR) && !path.contains("//")
}

/// A directory path: absolute, ends with the separator, no empty components.
pub fn is_dir(path: &str) -> bool {
    path.starts_with(PATH_SEPARATOR)
        && path.ends_with(PATH_SEPARATOR)
        && (path.len() == 1 || !path.contains("//"))
}

/// Split a key into its directory (with trailing separator) and name.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    if !is_key(key) {
        return None;
    }
    let idx = key.rfind(PATH_SEPARATOR)?;
    Some((&key[..=idx], &key[idx + 1..]))
}
