//! Settings schemas: loading, validation and key-path resolution.
//!
//! A schema file is YAML:
//!
//! ```yaml
//! schemas:
//!   - id: org.par-term
//!     path: /org/par-term/
//!     keys:
//!       - name: theme
//!         type: s
//!         default: system
//!         range: { choices: [system, dark, light] }
//!     children:
//!       - name: keybindings
//!         schema: org.par-term.Keybindings
//! mounts:
//!   - path: /org/par-term/profiles:/
//!     schema: org.par-term.Profile
//! ```
//!
//! Schemas without a `path` are relocatable: they only appear below a parent
//! schema's `children` or as instances of a `mount`, where every direct
//! sub-directory of the mount path is one instance.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml_ng::Value as Yaml;

use crate::error::SettingsError;
use crate::value::{Value, ValueType};
use crate::{PATH_SEPARATOR, is_dir, split_key};

/// Schema file compiled into the binary; the trusted reference source.
pub const BUNDLED_SCHEMA: &str = include_str!("../schemas/org.par-term.yaml");

/// Environment variable that overrides installed-schema discovery.
pub const SCHEMA_DIR_ENV: &str = "PAR_TERM_SCHEMA_DIR";

/// System-wide schema directory, the last discovery candidate.
pub const SYSTEM_SCHEMA_DIR: &str = "/usr/share/par-term/schemas";

/// Nesting bound when expanding child schemas.
const MAX_CHILD_DEPTH: usize = 16;

// ============================================================================
// Model
// ============================================================================

/// Constraint on the values a key may hold.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyRange {
    /// Any value of the key's type.
    Any,
    /// One of an enumerated set.
    Choices(Vec<Value>),
    /// A closed numeric interval.
    Interval { min: Value, max: Value },
}

impl KeyRange {
    /// Short name of the constraint kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            KeyRange::Any => "type",
            KeyRange::Choices(_) => "enum",
            KeyRange::Interval { .. } => "range",
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        match self {
            KeyRange::Any => true,
            KeyRange::Choices(choices) => choices.contains(value),
            KeyRange::Interval { min, max } => {
                matches!(
                    min.compare_numeric(value),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                ) && matches!(
                    value.compare_numeric(max),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaKey {
    pub name: String,
    pub value_type: ValueType,
    pub default: Value,
    pub range: KeyRange,
    pub summary: Option<String>,
}

impl SchemaKey {
    /// Whether `value` has this key's type and lies within its range.
    pub fn accepts(&self, value: &Value) -> bool {
        value.value_type() == self.value_type && self.range.contains(value)
    }
}

/// A named child namespace of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChild {
    pub name: String,
    pub schema_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub id: String,
    /// Fixed storage path, `None` for relocatable schemas.
    pub path: Option<String>,
    pub keys: Vec<SchemaKey>,
    pub children: Vec<SchemaChild>,
}

impl Schema {
    pub fn key(&self, name: &str) -> Option<&SchemaKey> {
        self.keys.iter().find(|k| k.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&SchemaChild> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// A directory whose sub-directories are instances of a relocatable schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub path: String,
    pub schema_id: String,
}

/// A set of schemas loaded from one place.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSource {
    origin: String,
    schemas: BTreeMap<String, Schema>,
    mounts: Vec<Mount>,
}

// ----------------------------------------------------------------------------
// File format
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    schemas: Vec<SchemaDoc>,
    #[serde(default)]
    mounts: Vec<MountDoc>,
}

#[derive(Debug, Deserialize)]
struct SchemaDoc {
    id: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    keys: Vec<KeyDoc>,
    #[serde(default)]
    children: Vec<ChildDoc>,
}

#[derive(Debug, Deserialize)]
struct KeyDoc {
    name: String,
    #[serde(rename = "type")]
    signature: String,
    #[serde(default)]
    default: Yaml,
    /// Written as a one-entry map, `{ choices: [...] }` or
    /// `{ interval: { min, max } }`.
    #[serde(default, with = "serde_yaml_ng::with::singleton_map_recursive")]
    range: Option<RangeDoc>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RangeDoc {
    Choices(Vec<Yaml>),
    Interval { min: Yaml, max: Yaml },
}

#[derive(Debug, Deserialize)]
struct ChildDoc {
    name: String,
    schema: String,
}

#[derive(Debug, Deserialize)]
struct MountDoc {
    path: String,
    schema: String,
}

fn invalid(schema: &str, detail: impl std::fmt::Display) -> SettingsError {
    SettingsError::Schema(format!("{schema}: {detail}"))
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(PATH_SEPARATOR)
}

impl KeyDoc {
    fn into_key(self, schema_id: &str) -> Result<SchemaKey, SettingsError> {
        if !is_plain_name(&self.name) {
            return Err(invalid(schema_id, format!("invalid key name '{}'", self.name)));
        }
        let ctx = |e: SettingsError| invalid(schema_id, format!("key '{}': {e}", self.name));
        let value_type = ValueType::parse(&self.signature).map_err(ctx)?;
        let default = Value::from_yaml(&self.default, &value_type).map_err(ctx)?;
        let range = match self.range {
            None => KeyRange::Any,
            Some(RangeDoc::Choices(choices)) => KeyRange::Choices(
                choices
                    .iter()
                    .map(|c| Value::from_yaml(c, &value_type))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(ctx)?,
            ),
            Some(RangeDoc::Interval { min, max }) => {
                if !value_type.is_numeric() {
                    return Err(invalid(
                        schema_id,
                        format!("key '{}': interval on non-numeric type '{value_type}'", self.name),
                    ));
                }
                let min = Value::from_yaml(&min, &value_type).map_err(ctx)?;
                let max = Value::from_yaml(&max, &value_type).map_err(ctx)?;
                if !matches!(
                    min.compare_numeric(&max),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                ) {
                    return Err(invalid(
                        schema_id,
                        format!("key '{}': interval minimum {min} exceeds maximum {max}", self.name),
                    ));
                }
                KeyRange::Interval { min, max }
            }
        };
        if !range.contains(&default) {
            return Err(invalid(
                schema_id,
                format!("key '{}': default {default} is outside its own range", self.name),
            ));
        }
        Ok(SchemaKey {
            name: self.name,
            value_type,
            default,
            range,
            summary: self.summary,
        })
    }
}

impl SchemaDoc {
    fn into_schema(self) -> Result<Schema, SettingsError> {
        if self.id.is_empty() {
            return Err(SettingsError::Schema("schema with empty id".to_string()));
        }
        if let Some(path) = &self.path
            && !is_dir(path)
        {
            return Err(invalid(&self.id, format!("path '{path}' must start and end with '/'")));
        }
        let mut seen = BTreeSet::new();
        let mut keys = Vec::with_capacity(self.keys.len());
        for key in self.keys {
            if !seen.insert(key.name.clone()) {
                return Err(invalid(&self.id, format!("duplicate key '{}'", key.name)));
            }
            keys.push(key.into_key(&self.id)?);
        }
        let mut children = Vec::with_capacity(self.children.len());
        for child in self.children {
            if !is_plain_name(&child.name) || !seen.insert(child.name.clone()) {
                return Err(invalid(&self.id, format!("invalid or duplicate child '{}'", child.name)));
            }
            children.push(SchemaChild {
                name: child.name,
                schema_id: child.schema,
            });
        }
        Ok(Schema {
            id: self.id,
            path: self.path,
            keys,
            children,
        })
    }
}

// ============================================================================
// SchemaSource
// ============================================================================

impl SchemaSource {
    /// An empty source; useful as a base for [`Self::merge`].
    pub fn empty(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            schemas: BTreeMap::new(),
            mounts: Vec::new(),
        }
    }

    /// Parse and validate one schema document.
    pub fn from_yaml_str(text: &str, origin: impl Into<String>) -> Result<Self, SettingsError> {
        let origin = origin.into();
        let file: SchemaFile = serde_yaml_ng::from_str(text).map_err(|source| SettingsError::Yaml {
            path: PathBuf::from(&origin),
            source,
        })?;
        let mut source = Self::empty(origin);
        source.add_file(file)?;
        source.check_references()?;
        Ok(source)
    }

    /// The reference schemas compiled into the binary.
    pub fn bundled() -> Result<Self, SettingsError> {
        Self::from_yaml_str(BUNDLED_SCHEMA, "<bundled>")
    }

    /// Load every `*.yaml` file in `dir`, in file-name order.
    pub fn load_dir(dir: &Path) -> Result<Self, SettingsError> {
        let entries = fs::read_dir(dir).map_err(|e| SettingsError::io(dir, e))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "yaml") && p.is_file())
            .collect();
        files.sort();

        let mut source = Self::empty(dir.display().to_string());
        for file in &files {
            let text = fs::read_to_string(file).map_err(|e| SettingsError::io(file, e))?;
            let parsed: SchemaFile = serde_yaml_ng::from_str(&text).map_err(|source| SettingsError::Yaml {
                path: file.clone(),
                source,
            })?;
            source.add_file(parsed)?;
            log::debug!("Loaded schema file {:?}", file);
        }
        source.check_references()?;
        log::info!(
            "Loaded {} schema(s) from {} file(s) in {:?}",
            source.schemas.len(),
            files.len(),
            dir
        );
        Ok(source)
    }

    fn add_file(&mut self, file: SchemaFile) -> Result<(), SettingsError> {
        for doc in file.schemas {
            let schema = doc.into_schema()?;
            if self.schemas.contains_key(&schema.id) {
                return Err(invalid(&schema.id, "defined more than once"));
            }
            self.schemas.insert(schema.id.clone(), schema);
        }
        for mount in file.mounts {
            if !is_dir(&mount.path) {
                return Err(SettingsError::Schema(format!(
                    "mount path '{}' must start and end with '/'",
                    mount.path
                )));
            }
            self.mounts.push(Mount {
                path: mount.path,
                schema_id: mount.schema,
            });
        }
        Ok(())
    }

    fn check_references(&self) -> Result<(), SettingsError> {
        for schema in self.schemas.values() {
            for child in &schema.children {
                if !self.schemas.contains_key(&child.schema_id) {
                    return Err(invalid(
                        &schema.id,
                        format!("child '{}' names unknown schema '{}'", child.name, child.schema_id),
                    ));
                }
            }
        }
        if let Some(mount) = self.mounts.iter().find(|m| !self.schemas.contains_key(&m.schema_id)) {
            return Err(SettingsError::Schema(format!(
                "mount '{}' names unknown schema '{}'",
                mount.path, mount.schema_id
            )));
        }
        Ok(())
    }

    /// Insert or replace a schema. Used to assemble sources programmatically.
    pub fn insert(&mut self, schema: Schema) {
        self.schemas.insert(schema.id.clone(), schema);
    }

    pub fn add_mount(&mut self, mount: Mount) {
        self.mounts.push(mount);
    }

    /// Where this source was loaded from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn lookup(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(id)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    // ------------------------------------------------------------------------
    // Path resolution
    // ------------------------------------------------------------------------

    /// The schema whose keys live directly in directory `dir`.
    pub fn schema_at(&self, dir: &str) -> Option<&Schema> {
        for schema in self.schemas.values() {
            if let Some(path) = &schema.path
                && let Some(rest) = dir.strip_prefix(path.as_str())
                && let Some(found) = self.descend(schema, rest)
            {
                return Some(found);
            }
        }
        for mount in &self.mounts {
            if let Some(rest) = dir.strip_prefix(mount.path.as_str())
                && let Some((instance, rest)) = rest.split_once(PATH_SEPARATOR)
                && !instance.is_empty()
                && let Some(schema) = self.schemas.get(&mount.schema_id)
                && let Some(found) = self.descend(schema, rest)
            {
                return Some(found);
            }
        }
        None
    }

    fn descend<'a>(&'a self, schema: &'a Schema, rest: &str) -> Option<&'a Schema> {
        if rest.is_empty() {
            return Some(schema);
        }
        let (name, rest) = rest.split_once(PATH_SEPARATOR)?;
        let child = schema.child(name)?;
        self.descend(self.schemas.get(&child.schema_id)?, rest)
    }

    /// Resolve a full key path to its schema and key definition.
    pub fn resolve_key(&self, key: &str) -> Option<(&Schema, &SchemaKey)> {
        let (dir, name) = split_key(key)?;
        let schema = self.schema_at(dir)?;
        Some((schema, schema.key(name)?))
    }

    /// Every key path the schemas place below directory `dir`.
    ///
    /// Covers fixed-path schemas, their children, and the children of a mount
    /// instance when `dir` lies inside one. Instances of a mount are not
    /// discoverable from the schemas alone, so a `dir` above a mount point
    /// yields no keys for the instances beneath it.
    pub fn known_keys_under(&self, dir: &str) -> Vec<String> {
        let mut placements = Vec::new();
        for schema in self.schemas.values() {
            if let Some(path) = &schema.path {
                self.collect_placements(schema, path.clone(), 0, &mut placements);
            }
        }
        for mount in &self.mounts {
            if let Some(rest) = dir.strip_prefix(mount.path.as_str())
                && let Some((instance, _)) = rest.split_once(PATH_SEPARATOR)
                && !instance.is_empty()
                && let Some(schema) = self.schemas.get(&mount.schema_id)
            {
                let base = format!("{}{instance}{PATH_SEPARATOR}", mount.path);
                self.collect_placements(schema, base, 0, &mut placements);
            } else if mount.path.starts_with(dir) {
                log::debug!(
                    "Instances of mount {} are not enumerable from schemas",
                    mount.path
                );
            }
        }

        let mut keys = BTreeSet::new();
        for (path, schema) in placements {
            if path.starts_with(dir) {
                keys.extend(schema.keys.iter().map(|k| format!("{path}{}", k.name)));
            }
        }
        keys.into_iter().collect()
    }

    fn collect_placements<'a>(
        &'a self,
        schema: &'a Schema,
        path: String,
        depth: usize,
        out: &mut Vec<(String, &'a Schema)>,
    ) {
        if depth > MAX_CHILD_DEPTH {
            log::warn!("Schema {} nests children too deeply at {path}", schema.id);
            return;
        }
        for child in &schema.children {
            if let Some(child_schema) = self.schemas.get(&child.schema_id) {
                let child_path = format!("{path}{}{PATH_SEPARATOR}", child.name);
                self.collect_placements(child_schema, child_path, depth + 1, out);
            }
        }
        out.push((path, schema));
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Candidate directories for the installed schemas, in priority order.
pub fn installed_schema_dirs(configured: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs_out = Vec::new();
    if let Ok(dir) = std::env::var(SCHEMA_DIR_ENV)
        && !dir.is_empty()
    {
        dirs_out.push(PathBuf::from(dir));
    }
    if let Some(dir) = configured {
        dirs_out.push(dir.to_path_buf());
    }
    if let Some(data) = dirs::data_dir() {
        dirs_out.push(data.join("par-term").join("schemas"));
    }
    dirs_out.push(PathBuf::from(SYSTEM_SCHEMA_DIR));
    dirs_out
}

/// Load the installed schemas from the first candidate directory that exists.
///
/// Returns `Ok(None)` when no candidate directory exists.
pub fn discover_installed(configured: Option<&Path>) -> Result<Option<SchemaSource>, SettingsError> {
    for dir in installed_schema_dirs(configured) {
        if dir.is_dir() {
            log::info!("Using installed schemas from {:?}", dir);
            return SchemaSource::load_dir(&dir).map(Some);
        }
    }
    log::warn!("No installed schema directory found");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundled() -> SchemaSource {
        SchemaSource::bundled().expect("bundled schema must load")
    }

    #[test]
    fn test_bundled_schema_loads() {
        let source = bundled();
        let root = source.lookup("org.par-term").unwrap();
        assert_eq!(root.path.as_deref(), Some("/org/par-term/"));
        assert!(root.key("theme").is_some());
        assert!(root.child("keybindings").is_some());
    }

    #[test]
    fn test_range_map_forms_parse() {
        let source = bundled();
        let root = source.lookup("org.par-term").unwrap();
        assert_eq!(
            root.key("theme").unwrap().range,
            KeyRange::Choices(vec![
                Value::from("system"),
                Value::from("dark"),
                Value::from("light")
            ])
        );
        assert_eq!(
            root.key("font-scale").unwrap().range,
            KeyRange::Interval {
                min: Value::Double(0.25),
                max: Value::Double(4.0)
            }
        );
        assert_eq!(root.key("confirm-close").unwrap().range, KeyRange::Any);

        let text = r#"
schemas:
  - id: test
    path: /test/
    keys:
      - name: mode
        type: s
        default: up
        range:
          choices: [up, down]
"#;
        let source = SchemaSource::from_yaml_str(text, "inline").unwrap();
        assert_eq!(
            source.lookup("test").unwrap().key("mode").unwrap().range.kind(),
            "enum"
        );
    }

    #[test]
    fn test_resolve_fixed_child_and_mount_keys() {
        let source = bundled();
        let (schema, key) = source.resolve_key("/org/par-term/font-scale").unwrap();
        assert_eq!(schema.id, "org.par-term");
        assert_eq!(key.value_type, ValueType::Double);

        let (schema, _) = source.resolve_key("/org/par-term/keybindings/new-tab").unwrap();
        assert_eq!(schema.id, "org.par-term.Keybindings");

        let (schema, _) = source
            .resolve_key("/org/par-term/profiles:/:b1dcc9dd/visible-name")
            .unwrap();
        assert_eq!(schema.id, "org.par-term.Profile");

        let (schema, _) = source.resolve_key("/org/par-term/profiles:/list").unwrap();
        assert_eq!(schema.id, "org.par-term.ProfilesList");

        assert!(source.resolve_key("/org/par-term/no-such-key").is_none());
        assert!(source.resolve_key("/org/other/theme").is_none());
    }

    #[test]
    fn test_known_keys_under_profile_instance() {
        let source = bundled();
        let keys = source.known_keys_under("/org/par-term/profiles:/:abc/");
        assert!(keys.contains(&"/org/par-term/profiles:/:abc/visible-name".to_string()));
        assert!(keys.iter().all(|k| k.starts_with("/org/par-term/profiles:/:abc/")));
    }

    #[test]
    fn test_known_keys_under_fixed_dir_includes_children() {
        let source = bundled();
        let keys = source.known_keys_under("/org/par-term/");
        assert!(keys.contains(&"/org/par-term/theme".to_string()));
        assert!(keys.contains(&"/org/par-term/keybindings/new-tab".to_string()));
        let only_bindings = source.known_keys_under("/org/par-term/keybindings/");
        assert!(only_bindings.iter().all(|k| k.starts_with("/org/par-term/keybindings/")));
        assert!(!only_bindings.is_empty());
    }

    #[test]
    fn test_default_outside_range_is_rejected() {
        let text = r#"
schemas:
  - id: test
    path: /test/
    keys:
      - name: mode
        type: s
        default: sideways
        range: { choices: [up, down] }
"#;
        let err = SchemaSource::from_yaml_str(text, "inline").unwrap_err();
        assert!(err.to_string().contains("outside its own range"));
    }

    #[test]
    fn test_interval_validation() {
        let text = r#"
schemas:
  - id: test
    path: /test/
    keys:
      - name: scale
        type: d
        default: 1.0
        range: { interval: { min: 2.0, max: 0.5 } }
"#;
        assert!(SchemaSource::from_yaml_str(text, "inline").is_err());

        let text = r#"
schemas:
  - id: test
    path: /test/
    keys:
      - name: label
        type: s
        default: x
        range: { interval: { min: a, max: z } }
"#;
        assert!(SchemaSource::from_yaml_str(text, "inline").is_err());
    }

    #[test]
    fn test_unknown_child_schema_is_rejected() {
        let text = r#"
schemas:
  - id: test
    path: /test/
    children:
      - name: sub
        schema: missing.Schema
"#;
        assert!(SchemaSource::from_yaml_str(text, "inline").is_err());
    }

    #[test]
    fn test_bad_path_is_rejected() {
        let text = "schemas:\n  - id: test\n    path: /test\n";
        assert!(SchemaSource::from_yaml_str(text, "inline").is_err());
    }

    #[test]
    fn test_load_dir_merges_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "schemas:\n  - id: a\n    path: /a/\n    keys:\n      - { name: k, type: b, default: true }\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "schemas:\n  - id: b\n    path: /b/\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not yaml").unwrap();
        let source = SchemaSource::load_dir(dir.path()).unwrap();
        assert!(source.lookup("a").is_some());
        assert!(source.lookup("b").is_some());
        assert_eq!(source.schemas().count(), 2);
    }

    #[test]
    fn test_range_contains() {
        let range = KeyRange::Interval {
            min: Value::Int32(0),
            max: Value::Int32(10),
        };
        assert!(range.contains(&Value::Int32(0)));
        assert!(range.contains(&Value::Int32(10)));
        assert!(!range.contains(&Value::Int32(11)));
        assert!(!range.contains(&Value::Int64(5)));
    }
}
