//! The store handle settings objects are built on.
//!
//! A process picks its backend once at startup: the main process (and a
//! preferences process run standalone) uses [`DirectStore`], a preferences
//! process launched over the bridge uses [`BridgedStore`]. The handle is
//! passed explicitly to every settings object; there is no process-wide
//! default.

use std::sync::Arc;

use par_term_settings::{Permission, SchemaSource, SettingsStore, Value, ValueType, is_dir};

use crate::client::BridgedStore;
use crate::error::BridgeError;
use crate::tree::apply_write_tree;

/// In-process access to the canonical store.
#[derive(Clone)]
pub struct DirectStore {
    store: Arc<dyn SettingsStore>,
    schemas: Arc<SchemaSource>,
}

impl DirectStore {
    pub fn new(store: Arc<dyn SettingsStore>, schemas: Arc<SchemaSource>) -> Self {
        Self { store, schemas }
    }

    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }
}

/// Either a direct or a bridged store.
#[derive(Clone)]
pub enum SettingsBackend {
    Direct(DirectStore),
    Bridged(Arc<BridgedStore>),
}

impl SettingsBackend {
    pub fn direct(store: Arc<dyn SettingsStore>, schemas: Arc<SchemaSource>) -> Self {
        SettingsBackend::Direct(DirectStore::new(store, schemas))
    }

    pub fn is_bridged(&self) -> bool {
        matches!(self, SettingsBackend::Bridged(_))
    }

    pub async fn get_permission(&self, path: &str) -> Result<Permission, BridgeError> {
        match self {
            SettingsBackend::Direct(d) => Ok(d.store.get_permission(path)),
            SettingsBackend::Bridged(b) => b.get_permission(path).await,
        }
    }

    pub async fn get_writable(&self, key: &str) -> Result<bool, BridgeError> {
        match self {
            SettingsBackend::Direct(d) => Ok(d.store.get_writable(key)),
            SettingsBackend::Bridged(b) => b.get_writable(key).await,
        }
    }

    pub async fn read(
        &self,
        key: &str,
        expected: &ValueType,
        want_default: bool,
    ) -> Result<Option<Value>, BridgeError> {
        match self {
            SettingsBackend::Direct(d) => Ok(d.store.read(key, expected, want_default)),
            SettingsBackend::Bridged(b) => b.read(key, expected, want_default).await,
        }
    }

    pub async fn read_user_value(
        &self,
        key: &str,
        expected: &ValueType,
    ) -> Result<Option<Value>, BridgeError> {
        match self {
            SettingsBackend::Direct(d) => Ok(d.store.read_user_value(key, expected)),
            SettingsBackend::Bridged(b) => b.read_user_value(key, expected).await,
        }
    }

    pub async fn write(&self, key: &str, value: Option<Value>) -> Result<bool, BridgeError> {
        match self {
            SettingsBackend::Direct(d) => Ok(d.store.write(key, value, None)),
            SettingsBackend::Bridged(b) => b.write(key, value).await,
        }
    }

    /// See [`BridgedStore::write_tree`]; entry keys are relative to `prefix`.
    pub async fn write_tree(
        &self,
        prefix: &str,
        entries: Vec<(String, Option<Value>)>,
    ) -> Result<bool, BridgeError> {
        match self {
            SettingsBackend::Direct(d) => {
                if !is_dir(prefix) {
                    return Err(BridgeError::Protocol(format!(
                        "tree prefix '{prefix}' is not a directory"
                    )));
                }
                let entries = entries
                    .into_iter()
                    .map(|(rel, value)| (format!("{prefix}{rel}"), value))
                    .collect();
                Ok(apply_write_tree(d.store.as_ref(), &d.schemas, entries, None))
            }
            SettingsBackend::Bridged(b) => b.write_tree(prefix, entries).await,
        }
    }

    pub async fn reset(&self, key: &str) -> Result<(), BridgeError> {
        match self {
            SettingsBackend::Direct(d) => {
                d.store.reset(key, None);
                Ok(())
            }
            SettingsBackend::Bridged(b) => b.reset(key).await,
        }
    }

    pub async fn subscribe(&self, path: &str) -> Result<(), BridgeError> {
        match self {
            SettingsBackend::Direct(d) => {
                d.store.subscribe(path);
                Ok(())
            }
            SettingsBackend::Bridged(b) => b.subscribe(path).await,
        }
    }

    pub async fn unsubscribe(&self, path: &str) -> Result<(), BridgeError> {
        match self {
            SettingsBackend::Direct(d) => {
                d.store.unsubscribe(path);
                Ok(())
            }
            SettingsBackend::Bridged(b) => b.unsubscribe(path).await,
        }
    }

    pub async fn sync(&self) -> Result<(), BridgeError> {
        match self {
            SettingsBackend::Direct(d) => Ok(d.store.sync()?),
            SettingsBackend::Bridged(b) => b.sync().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use par_term_settings::KeyfileStore;

    fn backend() -> (Arc<KeyfileStore>, SettingsBackend) {
        let store = Arc::new(KeyfileStore::in_memory());
        let schemas = Arc::new(SchemaSource::bundled().unwrap());
        (store.clone(), SettingsBackend::direct(store, schemas))
    }

    #[tokio::test]
    async fn test_direct_write_and_read() {
        let (_, backend) = backend();
        assert!(!backend.is_bridged());
        assert!(
            backend
                .write("/org/par-term/theme", Some(Value::from("light")))
                .await
                .unwrap()
        );
        assert_eq!(
            backend
                .read("/org/par-term/theme", &ValueType::String, false)
                .await
                .unwrap(),
            Some(Value::from("light"))
        );
        backend.reset("/org/par-term/theme").await.unwrap();
        assert_eq!(
            backend
                .read("/org/par-term/theme", &ValueType::String, false)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_direct_write_tree_erases_profile() {
        let (store, backend) = backend();
        let key = "/org/par-term/profiles:/:p1/visible-name";
        store.write(key, Some(Value::from("Work")), None);
        let ok = backend
            .write_tree("/org/par-term/profiles:/", vec![(":p1/".to_string(), None)])
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(store.read(key, &ValueType::String, false), None);
    }

    #[tokio::test]
    async fn test_direct_write_tree_needs_directory_prefix() {
        let (_, backend) = backend();
        let err = backend
            .write_tree("/org/par-term/theme", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }
}
