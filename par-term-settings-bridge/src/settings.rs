//! Schema-bound settings objects.
//!
//! A [`Settings`] binds one schema to one directory and reads and writes its
//! keys through an explicit [`SettingsBackend`]. Values coming back from the
//! backend are checked against the schema: anything missing, undecodable or
//! out of range reads as the default.

use std::sync::Arc;

use par_term_settings::{KeyRange, Schema, SchemaKey, SchemaSource, SettingsError, Value, is_dir};

use crate::backend::SettingsBackend;
use crate::error::BridgeError;

/// Settings for one schema at one path.
#[derive(Clone)]
pub struct Settings {
    backend: SettingsBackend,
    schema: Arc<Schema>,
    path: String,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("schema", &self.schema.id)
            .field("path", &self.path)
            .field("bridged", &self.backend.is_bridged())
            .finish()
    }
}

impl Settings {
    /// Settings for a schema with a fixed path.
    pub fn new(
        backend: SettingsBackend,
        source: &SchemaSource,
        schema_id: &str,
    ) -> Result<Self, SettingsError> {
        let schema = source
            .lookup(schema_id)
            .ok_or_else(|| SettingsError::SchemaNotFound(schema_id.to_string()))?;
        let path = schema.path.clone().ok_or_else(|| {
            SettingsError::Schema(format!("schema {schema_id} is relocatable; a path is required"))
        })?;
        Ok(Self {
            backend,
            schema: Arc::new(schema.clone()),
            path,
        })
    }

    /// Settings for a relocatable schema placed at `path`.
    pub fn new_with_path(
        backend: SettingsBackend,
        source: &SchemaSource,
        schema_id: &str,
        path: &str,
    ) -> Result<Self, SettingsError> {
        if !is_dir(path) {
            return Err(SettingsError::InvalidPath(path.to_string()));
        }
        let schema = source
            .lookup(schema_id)
            .ok_or_else(|| SettingsError::SchemaNotFound(schema_id.to_string()))?;
        if let Some(fixed) = &schema.path
            && fixed != path
        {
            return Err(SettingsError::Schema(format!(
                "schema {schema_id} lives at {fixed}, not {path}"
            )));
        }
        Ok(Self {
            backend,
            schema: Arc::new(schema.clone()),
            path: path.to_string(),
        })
    }

    /// Settings for the child `name`, built directly from the child's schema
    /// id.
    pub fn child(&self, name: &str, source: &SchemaSource) -> Result<Self, SettingsError> {
        let child = self
            .schema
            .child(name)
            .ok_or_else(|| SettingsError::Schema(format!("{} has no child '{name}'", self.schema.id)))?;
        let path = format!("{}{name}/", self.path);
        let schema = source
            .lookup(&child.schema_id)
            .ok_or_else(|| SettingsError::SchemaNotFound(child.schema_id.clone()))?;
        Ok(Self {
            backend: self.backend.clone(),
            schema: Arc::new(schema.clone()),
            path,
        })
    }

    pub fn schema_id(&self) -> &str {
        &self.schema.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn backend(&self) -> &SettingsBackend {
        &self.backend
    }

    /// Names of every key in the schema, in schema order.
    pub fn keys(&self) -> Vec<&str> {
        self.schema.keys.iter().map(|k| k.name.as_str()).collect()
    }

    pub fn key_info(&self, name: &str) -> Result<&SchemaKey, SettingsError> {
        self.schema
            .key(name)
            .ok_or_else(|| SettingsError::UnknownKey(self.full_key(name)))
    }

    pub fn range(&self, name: &str) -> Result<&KeyRange, SettingsError> {
        Ok(&self.key_info(name)?.range)
    }

    pub fn full_key(&self, name: &str) -> String {
        format!("{}{name}", self.path)
    }

    /// Keep `value` only if the schema accepts it for `key`.
    fn accept(&self, key: &SchemaKey, value: Option<Value>) -> Option<Value> {
        let value = value?;
        if key.accepts(&value) {
            Some(value)
        } else {
            log::warn!(
                "Ignoring stored value {value} for {}: outside its range",
                self.full_key(&key.name)
            );
            None
        }
    }

    /// The effective value of `name`.
    pub async fn get(&self, name: &str) -> Result<Value, BridgeError> {
        let key = self.key_info(name)?;
        let full = self.full_key(name);
        match self.backend.read(&full, &key.value_type, false).await {
            Ok(value) => {
                if let Some(value) = self.accept(key, value) {
                    return Ok(value);
                }
            }
            Err(e) => log::warn!("Reading {full} failed, using default: {e}"),
        }
        self.get_default_value(name).await
    }

    /// The value the user set, if any.
    pub async fn get_user_value(&self, name: &str) -> Result<Option<Value>, BridgeError> {
        let key = self.key_info(name)?;
        let value = self
            .backend
            .read_user_value(&self.full_key(name), &key.value_type)
            .await?;
        Ok(self.accept(key, value))
    }

    /// The value `name` has when the user has not set one: the store's
    /// default layer if it holds an acceptable value, else the schema
    /// default.
    pub async fn get_default_value(&self, name: &str) -> Result<Value, BridgeError> {
        let key = self.key_info(name)?;
        let full = self.full_key(name);
        match self.backend.read(&full, &key.value_type, true).await {
            Ok(value) => {
                if let Some(value) = self.accept(key, value) {
                    return Ok(value);
                }
            }
            Err(e) => log::debug!("Reading default of {full} failed: {e}"),
        }
        Ok(key.default.clone())
    }

    /// Set `name` to `value` after checking type and range. Returns `false`
    /// when the key is not writable.
    pub async fn set(&self, name: &str, value: Value) -> Result<bool, BridgeError> {
        let key = self.key_info(name)?;
        let full = self.full_key(name);
        if value.value_type() != key.value_type {
            return Err(SettingsError::InvalidValue {
                expected: key.value_type.signature(),
                reason: format!("{full} cannot hold {value} of type '{}'", value.signature()),
            }
            .into());
        }
        if !key.range.contains(&value) {
            return Err(SettingsError::OutOfRange {
                key: full,
                value: value.to_string(),
            }
            .into());
        }
        let written = self.backend.write(&full, Some(value)).await?;
        if !written {
            log::info!("{full} is not writable");
        }
        Ok(written)
    }

    pub async fn reset(&self, name: &str) -> Result<(), BridgeError> {
        self.key_info(name)?;
        self.backend.reset(&self.full_key(name)).await
    }

    pub async fn is_writable(&self, name: &str) -> Result<bool, BridgeError> {
        self.key_info(name)?;
        self.backend.get_writable(&self.full_key(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use par_term_settings::{KeyfileStore, SettingsStore, ValueType};

    const PROFILE: &str = "org.par-term.Profile";

    fn setup() -> (Arc<KeyfileStore>, SchemaSource, SettingsBackend) {
        let store = Arc::new(KeyfileStore::in_memory());
        let source = SchemaSource::bundled().unwrap();
        let backend = SettingsBackend::direct(store.clone(), Arc::new(source.clone()));
        (store, source, backend)
    }

    #[tokio::test]
    async fn test_get_falls_back_to_schema_default() {
        let (_, source, backend) = setup();
        let settings = Settings::new(backend, &source, "org.par-term").unwrap();
        assert_eq!(settings.get("theme").await.unwrap(), Value::from("system"));
        assert_eq!(
            settings.get("default-size").await.unwrap(),
            Value::Tuple(vec![Value::UInt16(80), Value::UInt16(24)])
        );
    }

    #[tokio::test]
    async fn test_site_default_beats_schema_default() {
        let (store, source, backend) = setup();
        store.set_default("/org/par-term/theme", Value::from("dark"));
        let settings = Settings::new(backend, &source, "org.par-term").unwrap();
        assert_eq!(settings.get("theme").await.unwrap(), Value::from("dark"));
        assert_eq!(settings.get_user_value("theme").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_out_of_range_stored_value_reads_as_default() {
        let (store, source, backend) = setup();
        store.write("/org/par-term/font-scale", Some(Value::Double(99.0)), None);
        let settings = Settings::new(backend, &source, "org.par-term").unwrap();
        assert_eq!(settings.get("font-scale").await.unwrap(), Value::Double(1.0));
    }

    #[tokio::test]
    async fn test_set_checks_type_and_range() {
        let (store, source, backend) = setup();
        let settings = Settings::new(backend, &source, "org.par-term").unwrap();

        let err = settings.set("font-scale", Value::from("big")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Settings(SettingsError::InvalidValue { .. })));
        let err = settings.set("theme", Value::from("purple")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Settings(SettingsError::OutOfRange { .. })));

        assert!(settings.set("font-scale", Value::Double(1.5)).await.unwrap());
        assert_eq!(
            store.read("/org/par-term/font-scale", &ValueType::Double, false),
            Some(Value::Double(1.5))
        );
    }

    #[tokio::test]
    async fn test_locked_key_is_not_writable() {
        let (store, source, backend) = setup();
        store.lock("/org/par-term/theme");
        let settings = Settings::new(backend, &source, "org.par-term").unwrap();
        assert!(!settings.is_writable("theme").await.unwrap());
        assert!(!settings.set("theme", Value::from("dark")).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let (_, source, backend) = setup();
        let settings = Settings::new(backend, &source, "org.par-term").unwrap();
        let err = settings.get("no-such-key").await.unwrap_err();
        assert!(matches!(err, BridgeError::Settings(SettingsError::UnknownKey(_))));
    }

    #[tokio::test]
    async fn test_relocatable_schema_needs_path() {
        let (_, source, backend) = setup();
        assert!(Settings::new(backend.clone(), &source, PROFILE).is_err());
        let profile =
            Settings::new_with_path(backend, &source, PROFILE, "/org/par-term/profiles:/:abc/")
                .unwrap();
        assert_eq!(profile.full_key("font"), "/org/par-term/profiles:/:abc/font");
        assert!(profile.set("cell-height-scale", Value::Double(3.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_child_is_built_from_its_schema_id() {
        let (_, source, backend) = setup();
        let root = Settings::new(backend, &source, "org.par-term").unwrap();
        let keybindings = root.child("keybindings", &source).unwrap();
        assert_eq!(keybindings.schema_id(), "org.par-term.Keybindings");
        assert_eq!(keybindings.path(), "/org/par-term/keybindings/");
        assert!(root.child("nope", &source).is_err());
    }
}
