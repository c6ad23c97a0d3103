//! The settings store contract.
//!
//! [`SettingsStore`] is the synchronous interface every settings consumer
//! talks to: the bridge server executes remote calls against it, and
//! direct-access processes use it without a bridge in between.
//!
//! Stores are untyped key/value maps. They never apply schema defaults: a
//! read returns `None` when nothing is stored, and the caller decides what
//! the effective value is.

use tokio::sync::broadcast;

use crate::error::SettingsError;
use crate::value::{Value, ValueType};

/// Identifies the writer of a change so a listener can skip its own echoes.
pub type OriginTag = u64;

/// Capacity of the change broadcast channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A change observed on a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Values changed. `paths` lists directories whose whole content may have
    /// changed; `keys` lists individual keys.
    Changed {
        keys: Vec<String>,
        paths: Vec<String>,
        origin: Option<OriginTag>,
    },
    /// The writability of a key (or of every key below a directory) changed.
    WritableChanged { key: String },
}

impl StoreChange {
    pub fn keys(keys: Vec<String>, origin: Option<OriginTag>) -> Self {
        StoreChange::Changed {
            keys,
            paths: Vec::new(),
            origin,
        }
    }

    pub fn origin(&self) -> Option<OriginTag> {
        match self {
            StoreChange::Changed { origin, .. } => *origin,
            StoreChange::WritableChanged { .. } => None,
        }
    }

    /// Whether any key or path of this change lies below `dir`.
    pub fn touches(&self, dir: &str) -> bool {
        match self {
            StoreChange::Changed { keys, paths, .. } => keys
                .iter()
                .chain(paths.iter())
                .any(|k| k.starts_with(dir) || (k.ends_with('/') && dir.starts_with(k.as_str()))),
            StoreChange::WritableChanged { key } => {
                key.starts_with(dir) || (key.ends_with('/') && dir.starts_with(key.as_str()))
            }
        }
    }
}

/// What a caller may do with a path, as seen by the store's lockdown policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// Writes below the path are currently allowed.
    pub allowed: bool,
    /// The caller could obtain write access (never true for lockdown).
    pub can_acquire: bool,
    /// The caller could give up write access it holds.
    pub can_release: bool,
}

impl Permission {
    pub fn granted() -> Self {
        Self {
            allowed: true,
            can_acquire: false,
            can_release: false,
        }
    }

    pub fn denied() -> Self {
        Self {
            allowed: false,
            can_acquire: false,
            can_release: false,
        }
    }
}

/// Synchronous facade over a persistent settings store.
///
/// Key paths are absolute (`/org/par-term/theme`); directory paths end with
/// `/`. Implementations must be safe to share between threads.
pub trait SettingsStore: Send + Sync {
    /// Read the effective stored value of `key`.
    ///
    /// With `want_default` the store's default layer is consulted instead of
    /// the user value. A stored value whose type is not `expected` reads as
    /// `None`.
    fn read(&self, key: &str, expected: &ValueType, want_default: bool) -> Option<Value>;

    /// The value the user set, ignoring lockdown and defaults.
    fn read_user_value(&self, key: &str, expected: &ValueType) -> Option<Value>;

    /// Store `value` at `key`; `None` resets the key. Returns `false` when the
    /// key is not writable.
    fn write(&self, key: &str, value: Option<Value>, origin: Option<OriginTag>) -> bool;

    /// Store several concrete keys at once: either every entry is applied or
    /// none is.
    ///
    /// Directory entries (paths ending in `/`) are not supported and make the
    /// whole call fail; callers erase a subtree by resetting its keys.
    fn write_tree(&self, entries: Vec<(String, Option<Value>)>, origin: Option<OriginTag>) -> bool;

    /// Remove the user value of `key`.
    fn reset(&self, key: &str, origin: Option<OriginTag>);

    fn get_writable(&self, key: &str) -> bool;

    fn get_permission(&self, path: &str) -> Permission;

    /// Express interest in changes below `path`.
    fn subscribe(&self, path: &str);

    fn unsubscribe(&self, path: &str);

    /// Flush pending writes to persistent storage.
    fn sync(&self) -> Result<(), SettingsError>;

    /// A receiver for every change made to the store from now on.
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_touches_subscribed_dir() {
        let change = StoreChange::keys(vec!["/org/par-term/theme".into()], None);
        assert!(change.touches("/org/par-term/"));
        assert!(change.touches("/"));
        assert!(!change.touches("/org/par-term/keybindings/"));

        let erase = StoreChange::Changed {
            keys: vec![],
            paths: vec!["/org/par-term/".into()],
            origin: Some(7),
        };
        assert!(erase.touches("/org/par-term/keybindings/"));
        assert_eq!(erase.origin(), Some(7));
    }
}
