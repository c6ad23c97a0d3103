//! Typed errors for the settings bridge.

use std::io;

use par_term_settings::{CodecError, SettingsError};
use thiserror::Error;

use crate::jsonrpc::RpcError;

/// Errors surfaced by bridge calls and channel bring-up.
#[derive(Debug, Error)]
pub enum BridgeError {
    // -----------------------------------------------------------------------
    // Payloads
    // -----------------------------------------------------------------------
    /// A value payload could not be decoded or had the wrong type.
    #[error("Malformed settings payload: {0}")]
    Decode(#[from] CodecError),

    /// A value payload was not valid base64 text.
    #[error("Settings payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A message did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------
    /// The channel was torn down while the call was outstanding.
    #[error("Bridge call cancelled")]
    Cancelled,

    /// No response arrived within the request timeout.
    #[error("Bridge call '{method}' timed out")]
    Timeout {
        /// Method that timed out.
        method: String,
    },

    /// The remote side answered with a JSON-RPC error.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The local settings layer rejected the operation.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The bridge has been lost and will not come back.
    #[error("Settings bridge unavailable")]
    Unavailable,

    // -----------------------------------------------------------------------
    // Channel bring-up
    // -----------------------------------------------------------------------
    /// The kernel could not create a socket pair.
    #[error("Could not create socket pair: {0}")]
    SocketPair(#[source] io::Error),

    /// The preferences executable could not be started.
    #[error("Could not spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The channel could not be established or was rejected.
    #[error("Bridge connection error: {0}")]
    Connection(String),

    #[error("I/O error on bridge channel: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Calls failing this way may succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Cancelled | BridgeError::Timeout { .. })
    }

    /// True for errors caused by a malformed payload.
    pub fn is_decode(&self) -> bool {
        matches!(self, BridgeError::Decode(_) | BridgeError::Base64(_))
    }

    /// True when the error means the channel itself is gone.
    pub fn is_channel_loss(&self) -> bool {
        matches!(
            self,
            BridgeError::Cancelled
                | BridgeError::Unavailable
                | BridgeError::Connection(_)
                | BridgeError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(BridgeError::Cancelled.is_retryable());
        assert!(
            BridgeError::Timeout {
                method: "settings/read".to_string()
            }
            .is_retryable()
        );
        assert!(!BridgeError::Unavailable.is_retryable());
        assert!(!BridgeError::Protocol("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_channel_loss_errors() {
        assert!(BridgeError::Unavailable.is_channel_loss());
        assert!(BridgeError::Cancelled.is_channel_loss());
        assert!(!BridgeError::Protocol("bad".to_string()).is_channel_loss());
    }
}
