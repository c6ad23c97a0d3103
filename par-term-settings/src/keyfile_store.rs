//! A YAML keyfile implementation of [`SettingsStore`].
//!
//! The file holds three layers:
//!
//! ```yaml
//! values:                     # user values
//!   /org/par-term/theme: { type: s, value: dark }
//! defaults:                   # site defaults, consulted for locked keys
//!   /org/par-term/font-scale: { type: d, value: 1.25 }
//! locked:                     # lockdown prefixes
//!   - /org/par-term/keybindings/
//! ```
//!
//! Changes live in memory until [`SettingsStore::sync`] writes the file
//! atomically. There is no bulk erase: a directory can only be cleared by
//! resetting its keys one at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value as Yaml;
use tokio::sync::broadcast;

use crate::error::SettingsError;
use crate::store::{
    CHANGE_CHANNEL_CAPACITY, OriginTag, Permission, SettingsStore, StoreChange,
};
use crate::value::{Value, ValueType};
use crate::{is_dir, is_key};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(rename = "type")]
    signature: String,
    value: Yaml,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyfileDoc {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<String, StoredEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    defaults: BTreeMap<String, StoredEntry>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    locked: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct KeyfileState {
    user: BTreeMap<String, Value>,
    defaults: BTreeMap<String, Value>,
    locked: BTreeSet<String>,
    subscriptions: BTreeMap<String, usize>,
    dirty: bool,
}

impl KeyfileState {
    fn is_locked(&self, path: &str) -> bool {
        self.locked
            .iter()
            .any(|prefix| path == prefix.as_str() || (is_dir(prefix) && path.starts_with(prefix.as_str())))
    }
}

/// Settings store persisted to a YAML file.
pub struct KeyfileStore {
    path: Option<PathBuf>,
    state: RwLock<KeyfileState>,
    changes: broadcast::Sender<StoreChange>,
}

impl std::fmt::Debug for KeyfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyfileStore")
            .field("path", &self.path)
            .field("keys", &self.state.read().user.len())
            .finish()
    }
}

fn load_layer(entries: BTreeMap<String, StoredEntry>, layer: &str, path: &Path) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, entry) in entries {
        if !is_key(&key) {
            log::warn!("Skipping invalid key '{key}' in {layer} of {:?}", path);
            continue;
        }
        let parsed = ValueType::parse(&entry.signature)
            .and_then(|ty| Value::from_yaml(&entry.value, &ty));
        match parsed {
            Ok(value) => {
                out.insert(key, value);
            }
            Err(e) => log::warn!("Skipping malformed entry '{key}' in {layer} of {:?}: {e}", path),
        }
    }
    out
}

fn store_layer(layer: &BTreeMap<String, Value>) -> BTreeMap<String, StoredEntry> {
    layer
        .iter()
        .map(|(key, value)| {
            (
                key.clone(),
                StoredEntry {
                    signature: value.signature(),
                    value: value.to_yaml(),
                },
            )
        })
        .collect()
}

impl KeyfileStore {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::with_state(None, KeyfileState::default())
    }

    /// Open the keyfile at `path`; a missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let mut state = KeyfileState::default();
        if path.exists() {
            let text = fs::read_to_string(&path).map_err(|e| SettingsError::io(&path, e))?;
            let doc: KeyfileDoc = if text.trim().is_empty() {
                KeyfileDoc::default()
            } else {
                serde_yaml_ng::from_str(&text).map_err(|source| SettingsError::Yaml {
                    path: path.clone(),
                    source,
                })?
            };
            state.user = load_layer(doc.values, "values", &path);
            state.defaults = load_layer(doc.defaults, "defaults", &path);
            state.locked = doc.locked;
            log::info!(
                "Loaded {} settings ({} defaults, {} locked paths) from {:?}",
                state.user.len(),
                state.defaults.len(),
                state.locked.len(),
                path
            );
        } else {
            log::info!("Settings keyfile {:?} does not exist yet", path);
        }
        Ok(Self::with_state(Some(path), state))
    }

    fn with_state(path: Option<PathBuf>, state: KeyfileState) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path,
            state: RwLock::new(state),
            changes,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Set a value in the site-default layer.
    pub fn set_default(&self, key: &str, value: Value) {
        let mut state = self.state.write();
        state.defaults.insert(key.to_string(), value);
        state.dirty = true;
    }

    /// Lock `path` (a key or a directory) against writes.
    pub fn lock(&self, path: &str) {
        let inserted = {
            let mut state = self.state.write();
            let inserted = state.locked.insert(path.to_string());
            state.dirty |= inserted;
            inserted
        };
        if inserted {
            log::info!("Locked settings path {path}");
            self.emit(StoreChange::WritableChanged {
                key: path.to_string(),
            });
        }
    }

    pub fn unlock(&self, path: &str) {
        let removed = {
            let mut state = self.state.write();
            let removed = state.locked.remove(path);
            state.dirty |= removed;
            removed
        };
        if removed {
            self.emit(StoreChange::WritableChanged {
                key: path.to_string(),
            });
        }
    }

    /// Every key with a user value, in order.
    pub fn user_keys(&self) -> Vec<String> {
        self.state.read().user.keys().cloned().collect()
    }

    /// Paths with at least one active subscription.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.read().subscriptions.keys().cloned().collect()
    }

    /// True when there are changes not yet written by `sync`.
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    fn emit(&self, change: StoreChange) {
        // No receivers is not an error; nobody is listening yet.
        let _ = self.changes.send(change);
    }

    fn save(path: &Path, doc: &KeyfileDoc) -> Result<(), SettingsError> {
        let yaml = serde_yaml_ng::to_string(doc).map_err(|source| SettingsError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SettingsError::io(parent, e))?;
        }

        // Atomic save: write to temp file then rename
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, &yaml).map_err(|e| SettingsError::io(&temp_path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| SettingsError::io(&temp_path, e))?;
        }
        fs::rename(&temp_path, path).map_err(|e| SettingsError::io(path, e))?;
        Ok(())
    }
}

impl SettingsStore for KeyfileStore {
    fn read(&self, key: &str, expected: &ValueType, want_default: bool) -> Option<Value> {
        let state = self.state.read();
        let layer = if want_default || state.is_locked(key) {
            &state.defaults
        } else {
            &state.user
        };
        let value = layer.get(key)?;
        if &value.value_type() != expected {
            log::warn!(
                "Stored value of {key} has type '{}', expected '{expected}'; ignoring it",
                value.signature()
            );
            return None;
        }
        Some(value.clone())
    }

    fn read_user_value(&self, key: &str, expected: &ValueType) -> Option<Value> {
        let state = self.state.read();
        state
            .user
            .get(key)
            .filter(|v| &v.value_type() == expected)
            .cloned()
    }

    fn write(&self, key: &str, value: Option<Value>, origin: Option<OriginTag>) -> bool {
        if !is_key(key) {
            log::warn!("Refusing write to invalid key '{key}'");
            return false;
        }
        {
            let mut state = self.state.write();
            if state.is_locked(key) {
                log::debug!("Write to locked key {key} rejected");
                return false;
            }
            match value {
                Some(v) => {
                    state.user.insert(key.to_string(), v);
                }
                None => {
                    state.user.remove(key);
                }
            }
            state.dirty = true;
        }
        self.emit(StoreChange::keys(vec![key.to_string()], origin));
        true
    }

    fn write_tree(&self, entries: Vec<(String, Option<Value>)>, origin: Option<OriginTag>) -> bool {
        if entries.is_empty() {
            return true;
        }
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        {
            let mut state = self.state.write();
            if let Some((bad, _)) = entries
                .iter()
                .find(|(k, _)| !is_key(k) || state.is_locked(k))
            {
                log::debug!("Tree write rejected at '{bad}'");
                return false;
            }
            for (key, value) in entries {
                match value {
                    Some(v) => {
                        state.user.insert(key, v);
                    }
                    None => {
                        state.user.remove(&key);
                    }
                }
            }
            state.dirty = true;
        }
        self.emit(StoreChange::keys(keys, origin));
        true
    }

    fn reset(&self, key: &str, origin: Option<OriginTag>) {
        let removed = {
            let mut state = self.state.write();
            if state.is_locked(key) {
                false
            } else {
                let removed = state.user.remove(key).is_some();
                state.dirty |= removed;
                removed
            }
        };
        if removed {
            self.emit(StoreChange::keys(vec![key.to_string()], origin));
        }
    }

    fn get_writable(&self, key: &str) -> bool {
        is_key(key) && !self.state.read().is_locked(key)
    }

    fn get_permission(&self, path: &str) -> Permission {
        if self.state.read().is_locked(path) {
            Permission::denied()
        } else {
            Permission::granted()
        }
    }

    fn subscribe(&self, path: &str) {
        *self
            .state
            .write()
            .subscriptions
            .entry(path.to_string())
            .or_insert(0) += 1;
    }

    fn unsubscribe(&self, path: &str) {
        let mut state = self.state.write();
        if let Some(count) = state.subscriptions.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                state.subscriptions.remove(path);
            }
        }
    }

    fn sync(&self) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let doc = {
            let mut state = self.state.write();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            KeyfileDoc {
                values: store_layer(&state.user),
                defaults: store_layer(&state.defaults),
                locked: state.locked.clone(),
            }
        };
        if let Err(e) = Self::save(path, &doc) {
            self.state.write().dirty = true;
            return Err(e);
        }
        log::debug!("Settings synced to {:?}", path);
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THEME: &str = "/org/par-term/theme";

    #[test]
    fn test_write_read_reset() {
        let store = KeyfileStore::in_memory();
        assert_eq!(store.read(THEME, &ValueType::String, false), None);
        assert!(store.write(THEME, Some(Value::from("dark")), None));
        assert_eq!(store.read(THEME, &ValueType::String, false), Some(Value::from("dark")));
        store.reset(THEME, None);
        assert_eq!(store.read(THEME, &ValueType::String, false), None);
    }

    #[test]
    fn test_type_mismatch_reads_as_none() {
        let store = KeyfileStore::in_memory();
        store.write(THEME, Some(Value::Int32(1)), None);
        assert_eq!(store.read(THEME, &ValueType::String, false), None);
        assert_eq!(store.read_user_value(THEME, &ValueType::Int32), Some(Value::Int32(1)));
    }

    #[test]
    fn test_lockdown_rejects_writes_and_serves_defaults() {
        let store = KeyfileStore::in_memory();
        store.write(THEME, Some(Value::from("dark")), None);
        store.set_default(THEME, Value::from("light"));
        store.lock("/org/par-term/");

        assert!(!store.get_writable(THEME));
        assert!(!store.get_permission("/org/par-term/").allowed);
        assert!(store.get_permission("/org/other/").allowed);
        assert!(!store.write(THEME, Some(Value::from("system")), None));
        assert_eq!(store.read(THEME, &ValueType::String, false), Some(Value::from("light")));
        assert_eq!(store.read_user_value(THEME, &ValueType::String), Some(Value::from("dark")));

        store.unlock("/org/par-term/");
        assert!(store.get_writable(THEME));
        assert_eq!(store.read(THEME, &ValueType::String, true), Some(Value::from("light")));
    }

    #[test]
    fn test_write_tree_is_all_or_nothing() {
        let store = KeyfileStore::in_memory();
        store.lock("/org/par-term/keybindings/");
        let ok = store.write_tree(
            vec![
                (THEME.to_string(), Some(Value::from("dark"))),
                ("/org/par-term/keybindings/copy".to_string(), Some(Value::from("<Ctrl>c"))),
            ],
            None,
        );
        assert!(!ok);
        assert_eq!(store.read(THEME, &ValueType::String, false), None);

        // Directory entries have no native meaning here.
        assert!(!store.write_tree(vec![("/org/par-term/".to_string(), None)], None));
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let store = KeyfileStore::in_memory();
        assert!(!store.write("relative/key", Some(Value::Bool(true)), None));
        assert!(!store.write("/org/dir/", Some(Value::Bool(true)), None));
        assert!(!store.get_writable("/org//double"));
    }

    #[tokio::test]
    async fn test_changes_carry_origin() {
        let store = KeyfileStore::in_memory();
        let mut rx = store.changes();
        store.write(THEME, Some(Value::from("dark")), Some(42));
        let change = rx.recv().await.unwrap();
        assert_eq!(change, StoreChange::keys(vec![THEME.to_string()], Some(42)));

        store.lock(THEME);
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreChange::WritableChanged { key: THEME.to_string() }
        );
    }

    #[test]
    fn test_subscription_counts() {
        let store = KeyfileStore::in_memory();
        store.subscribe("/org/par-term/");
        store.subscribe("/org/par-term/");
        store.unsubscribe("/org/par-term/");
        assert_eq!(store.subscriptions(), vec!["/org/par-term/".to_string()]);
        store.unsubscribe("/org/par-term/");
        assert!(store.subscriptions().is_empty());
    }

    #[test]
    fn test_sync_persists_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.yaml");
        let store = KeyfileStore::open(&path).unwrap();
        store.write(THEME, Some(Value::from("dark")), None);
        store.write(
            "/org/par-term/default-size",
            Some(Value::Tuple(vec![Value::UInt16(100), Value::UInt16(30)])),
            None,
        );
        store.set_default("/org/par-term/font-scale", Value::Double(1.5));
        store.lock("/org/par-term/keybindings/");
        assert!(store.is_dirty());
        store.sync().unwrap();
        assert!(!store.is_dirty());
        assert!(path.exists());
        assert!(!path.with_extension("yaml.tmp").exists());

        let reopened = KeyfileStore::open(&path).unwrap();
        assert_eq!(reopened.read(THEME, &ValueType::String, false), Some(Value::from("dark")));
        assert_eq!(
            reopened.read("/org/par-term/default-size", &ValueType::parse("(qq)").unwrap(), false),
            Some(Value::Tuple(vec![Value::UInt16(100), Value::UInt16(30)]))
        );
        assert_eq!(
            reopened.read("/org/par-term/font-scale", &ValueType::Double, true),
            Some(Value::Double(1.5))
        );
        assert!(!reopened.get_writable("/org/par-term/keybindings/copy"));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "values:\n  /a/good: { type: b, value: true }\n  /a/bad: { type: b, value: 3 }\n  /a/worse: { type: zz, value: 1 }\n",
        )
        .unwrap();
        let store = KeyfileStore::open(&path).unwrap();
        assert_eq!(store.user_keys(), vec!["/a/good".to_string()]);
    }
}
