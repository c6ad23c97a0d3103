//! Settings bridge wire protocol.
//!
//! Every settings value in a message, including "no value", travels as a
//! [`WireValue`]: the base64 text of a `par_term_settings::codec` frame.
//! JSON `null` cannot be used for this because it cannot tell an absent
//! value from `nothing` or from `just nothing`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use par_term_settings::{CodecError, Value, ValueType, codec};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Bumped on incompatible wire changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// The address the bridge server is exported at.
pub const OBJECT_PATH: &str = "/org/par_term/SettingsBridge";

/// Request methods.
pub mod method {
    pub const HELLO: &str = "bridge/hello";
    pub const GET_PERMISSION: &str = "settings/getPermission";
    pub const GET_WRITABLE: &str = "settings/getWritable";
    pub const READ: &str = "settings/read";
    pub const READ_USER_VALUE: &str = "settings/readUserValue";
    pub const RESET: &str = "settings/reset";
    pub const SUBSCRIBE: &str = "settings/subscribe";
    pub const UNSUBSCRIBE: &str = "settings/unsubscribe";
    pub const SYNC: &str = "settings/sync";
    pub const WRITE: &str = "settings/write";
    pub const WRITE_TREE: &str = "settings/writeTree";
}

/// Notifications sent by the server.
pub mod notification {
    pub const CHANGED: &str = "settings/changed";
    pub const WRITABLE_CHANGED: &str = "settings/writableChanged";
}

// ---------------------------------------------------------------------------
// Encoded values
// ---------------------------------------------------------------------------

/// An optional settings value as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireValue(pub String);

impl WireValue {
    pub fn encode(value: Option<&Value>) -> Result<Self, CodecError> {
        Ok(Self(STANDARD.encode(codec::encode(value)?)))
    }

    pub fn absent() -> Result<Self, CodecError> {
        Self::encode(None)
    }

    pub fn decode(&self) -> Result<Option<Value>, BridgeError> {
        let bytes = STANDARD.decode(self.0.as_bytes())?;
        Ok(codec::decode(&bytes)?)
    }

    /// Decode and require a present value to have type `expected`.
    pub fn decode_expecting(&self, expected: &ValueType) -> Result<Option<Value>, BridgeError> {
        let bytes = STANDARD.decode(self.0.as_bytes())?;
        Ok(codec::decode_expecting(&bytes, expected)?)
    }
}

// ---------------------------------------------------------------------------
// Params and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloParams {
    pub protocol_version: u32,
    pub object_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloResult {
    pub protocol_version: u32,
    pub object_path: String,
    pub server_pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathParams {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParams {
    pub key: String,
    /// Type signature the caller expects.
    pub expected_type: String,
    #[serde(default)]
    pub want_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadUserValueParams {
    pub key: String,
    pub expected_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteParams {
    pub key: String,
    pub value: WireValue,
}

/// One entry of a tree write. A `key` ending in `/` with an absent value
/// erases that directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Path relative to the request's `pathPrefix`.
    pub key: String,
    pub value: WireValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTreeParams {
    pub path_prefix: String,
    pub entries: Vec<TreeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueResult {
    pub value: WireValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResult {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritableResult {
    pub writable: bool,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedParams {
    #[serde(default)]
    pub keys: Vec<String>,
    /// Directories whose whole content may have changed.
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritableChangedParams {
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_value_distinguishes_absent_from_nothing() {
        let absent = WireValue::absent().unwrap();
        let nothing = WireValue::encode(Some(&Value::nothing(ValueType::String))).unwrap();
        assert_ne!(absent, nothing);
        assert_eq!(absent.decode().unwrap(), None);
        assert_eq!(
            nothing.decode().unwrap(),
            Some(Value::nothing(ValueType::String))
        );
    }

    #[test]
    fn test_wire_value_rejects_garbage() {
        let err = WireValue("not base64!".into()).decode().unwrap_err();
        assert!(err.is_decode());
        let err = WireValue(STANDARD.encode([1, 2, 3])).decode().unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_wire_value_type_check() {
        let wire = WireValue::encode(Some(&Value::Double(1.5))).unwrap();
        assert!(wire.decode_expecting(&ValueType::Double).is_ok());
        assert!(matches!(
            wire.decode_expecting(&ValueType::String),
            Err(BridgeError::Decode(CodecError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_params_use_camel_case() {
        let json = serde_json::to_value(ReadParams {
            key: "/org/par-term/theme".into(),
            expected_type: "s".into(),
            want_default: false,
        })
        .unwrap();
        assert_eq!(json["expectedType"], "s");
        assert_eq!(json["wantDefault"], false);

        let tree: WriteTreeParams = serde_json::from_value(serde_json::json!({
            "pathPrefix": "/org/par-term/",
            "entries": [{"key": "theme", "value": WireValue::absent().unwrap()}]
        }))
        .unwrap();
        assert_eq!(tree.entries.len(), 1);
    }
}
