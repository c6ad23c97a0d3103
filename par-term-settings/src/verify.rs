//! Schema compatibility verification.
//!
//! The installed schemas may be stale, patched by a distribution or missing
//! altogether. Before the settings store is trusted, every schema in the
//! bundled reference source is compared against its installed counterpart;
//! any divergence makes the caller use the reference source wholesale.
//!
//! Child namespaces are only checked for existence. Child settings objects are
//! always built from a known schema id rather than looked up through the
//! parent, so the identity of the installed child schema cannot be checked
//! here.

use thiserror::Error;

use crate::error::SettingsError;
use crate::schema::{KeyRange, Schema, SchemaKey, SchemaSource};
use crate::value::Value;

/// A divergence between an installed schema and the reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema '{schema}' is not installed")]
    SchemaMissing { schema: String },

    #[error("schema '{schema}' has path {found:?}, expected {expected:?}")]
    SchemaPath {
        schema: String,
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("schema '{schema}' lacks key '{key}'")]
    KeyMissing { schema: String, key: String },

    #[error("key '{schema}:{key}' has type '{found}', expected '{expected}'")]
    KeyType {
        schema: String,
        key: String,
        expected: String,
        found: String,
    },

    #[error("default {default} of key '{schema}:{key}' violates the reference range")]
    KeyDefault {
        schema: String,
        key: String,
        default: String,
    },

    #[error("key '{schema}:{key}' has range kind '{found}', expected '{expected}'")]
    KeyRangeType {
        schema: String,
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Same range kind, but the range's values are of a different type.
    #[error("range values of key '{schema}:{key}' have type '{found}', expected '{expected}'")]
    KeyRangeTypeMismatch {
        schema: String,
        key: String,
        expected: String,
        found: String,
    },

    #[error("permitted values of key '{schema}:{key}' differ from the reference")]
    KeyRangeEnumValue { schema: String, key: String },

    #[error("interval bounds of key '{schema}:{key}' differ from the reference")]
    KeyRangeInterval { schema: String, key: String },

    #[error("schema '{schema}' lacks child '{child}'")]
    ChildMissing { schema: String, child: String },
}

/// Check every reference schema against the installed source.
///
/// Returns the first divergence found. Schemas are visited in id order and
/// keys in declaration order, so the reported error is deterministic.
pub fn verify_source(installed: &SchemaSource, reference: &SchemaSource) -> Result<(), SchemaError> {
    for expected in reference.schemas() {
        let Some(found) = installed.lookup(&expected.id) else {
            return Err(SchemaError::SchemaMissing {
                schema: expected.id.clone(),
            });
        };
        verify_schema(found, expected)?;
    }
    Ok(())
}

/// Compare one installed schema with its reference.
pub fn verify_schema(installed: &Schema, reference: &Schema) -> Result<(), SchemaError> {
    if installed.path != reference.path {
        return Err(SchemaError::SchemaPath {
            schema: reference.id.clone(),
            expected: reference.path.clone(),
            found: installed.path.clone(),
        });
    }

    for expected in &reference.keys {
        let Some(found) = installed.key(&expected.name) else {
            return Err(SchemaError::KeyMissing {
                schema: reference.id.clone(),
                key: expected.name.clone(),
            });
        };
        verify_key(&reference.id, found, expected)?;
    }

    for child in &reference.children {
        if installed.child(&child.name).is_none() {
            return Err(SchemaError::ChildMissing {
                schema: reference.id.clone(),
                child: child.name.clone(),
            });
        }
    }
    Ok(())
}

fn verify_key(schema: &str, installed: &SchemaKey, reference: &SchemaKey) -> Result<(), SchemaError> {
    let schema = schema.to_string();
    let key = reference.name.clone();

    if installed.value_type != reference.value_type {
        return Err(SchemaError::KeyType {
            schema,
            key,
            expected: reference.value_type.signature(),
            found: installed.value_type.signature(),
        });
    }

    if !reference.accepts(&installed.default) {
        return Err(SchemaError::KeyDefault {
            schema,
            key,
            default: installed.default.to_string(),
        });
    }

    match (&installed.range, &reference.range) {
        (KeyRange::Any, KeyRange::Any) => Ok(()),
        (KeyRange::Choices(found), KeyRange::Choices(expected)) => {
            if let Some(bad) = found.iter().find(|v| v.value_type() != reference.value_type) {
                return Err(SchemaError::KeyRangeTypeMismatch {
                    schema,
                    key,
                    expected: reference.value_type.signature(),
                    found: bad.signature(),
                });
            }
            if same_set(found, expected) {
                Ok(())
            } else {
                Err(SchemaError::KeyRangeEnumValue { schema, key })
            }
        }
        (
            KeyRange::Interval { min, max },
            KeyRange::Interval {
                min: ref_min,
                max: ref_max,
            },
        ) => {
            for bound in [min, max] {
                if bound.value_type() != reference.value_type {
                    return Err(SchemaError::KeyRangeTypeMismatch {
                        schema,
                        key,
                        expected: reference.value_type.signature(),
                        found: bound.signature(),
                    });
                }
            }
            if min == ref_min && max == ref_max {
                Ok(())
            } else {
                Err(SchemaError::KeyRangeInterval { schema, key })
            }
        }
        (found, expected) => Err(SchemaError::KeyRangeType {
            schema,
            key,
            expected: expected.kind(),
            found: found.kind(),
        }),
    }
}

fn same_set(a: &[Value], b: &[Value]) -> bool {
    a.iter().all(|v| b.contains(v)) && b.iter().all(|v| a.contains(v))
}

// ============================================================================
// Source selection
// ============================================================================

/// Which schema source ended up being used, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaVerdict {
    /// The installed source matched the reference.
    Verified,
    /// The reference could not be loaded; the installed source is used as is.
    Unverified,
    /// The installed source diverged (or was missing); the reference is used.
    FellBack(SchemaError),
}

/// The result of [`select_schema_source`].
#[derive(Debug, Clone)]
pub struct SelectedSchemas {
    pub source: SchemaSource,
    pub verdict: SchemaVerdict,
}

/// Decide which schema source to trust.
///
/// - reference unavailable: use the installed source unverified, with a
///   warning; fail only if there is no installed source either
/// - installed source missing or divergent: use the reference, logging why
/// - otherwise: use the installed source
pub fn select_schema_source(
    installed: Option<SchemaSource>,
    reference: Result<SchemaSource, SettingsError>,
) -> Result<SelectedSchemas, SettingsError> {
    let reference = match reference {
        Ok(reference) => reference,
        Err(e) => {
            let Some(installed) = installed else {
                log::error!("No usable schemas: reference failed to load ({e}) and none are installed");
                return Err(e);
            };
            log::warn!(
                "Could not load reference schemas ({e}); trusting installed schemas from {} unverified",
                installed.origin()
            );
            return Ok(SelectedSchemas {
                source: installed,
                verdict: SchemaVerdict::Unverified,
            });
        }
    };

    let outcome = match &installed {
        Some(installed) => verify_source(installed, &reference),
        None => match reference.schemas().next() {
            Some(first) => Err(SchemaError::SchemaMissing {
                schema: first.id.clone(),
            }),
            None => Ok(()),
        },
    };

    match (outcome, installed) {
        (Ok(()), Some(installed)) => {
            log::info!("Installed schemas at {} verified", installed.origin());
            Ok(SelectedSchemas {
                source: installed,
                verdict: SchemaVerdict::Verified,
            })
        }
        (Ok(()), None) => Ok(SelectedSchemas {
            source: reference,
            verdict: SchemaVerdict::Verified,
        }),
        (Err(err), installed) => {
            log::error!(
                "Installed schemas at {} failed verification: {err}. Using reference schemas from {}",
                installed.as_ref().map_or("<none>", |s| s.origin()),
                reference.origin()
            );
            Ok(SelectedSchemas {
                source: reference,
                verdict: SchemaVerdict::FellBack(err),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    fn reference() -> SchemaSource {
        SchemaSource::bundled().unwrap()
    }

    fn patched(edit: impl FnOnce(&mut Schema)) -> SchemaSource {
        let mut source = reference();
        let mut root = source.lookup("org.par-term").unwrap().clone();
        edit(&mut root);
        source.insert(root);
        source
    }

    fn key_mut<'a>(schema: &'a mut Schema, name: &str) -> &'a mut SchemaKey {
        schema.keys.iter_mut().find(|k| k.name == name).unwrap()
    }

    #[test]
    fn test_identical_source_verifies() {
        assert_eq!(verify_source(&reference(), &reference()), Ok(()));
    }

    #[test]
    fn test_missing_schema() {
        let installed = SchemaSource::empty("empty");
        assert!(matches!(
            verify_source(&installed, &reference()),
            Err(SchemaError::SchemaMissing { .. })
        ));
    }

    #[test]
    fn test_path_mismatch() {
        let installed = patched(|s| s.path = Some("/org/other/".into()));
        assert!(matches!(
            verify_source(&installed, &reference()),
            Err(SchemaError::SchemaPath { .. })
        ));
    }

    #[test]
    fn test_missing_key() {
        let installed = patched(|s| s.keys.retain(|k| k.name != "theme"));
        assert_eq!(
            verify_source(&installed, &reference()),
            Err(SchemaError::KeyMissing {
                schema: "org.par-term".into(),
                key: "theme".into()
            })
        );
    }

    #[test]
    fn test_key_type_mismatch() {
        let installed = patched(|s| {
            let key = key_mut(s, "confirm-close");
            key.value_type = ValueType::String;
            key.default = Value::from("yes");
        });
        assert!(matches!(
            verify_source(&installed, &reference()),
            Err(SchemaError::KeyType { .. })
        ));
    }

    #[test]
    fn test_default_outside_reference_range() {
        let installed = patched(|s| {
            let key = key_mut(s, "theme");
            key.default = Value::from("solarized");
            key.range = KeyRange::Choices(vec![Value::from("solarized")]);
        });
        assert!(matches!(
            verify_source(&installed, &reference()),
            Err(SchemaError::KeyDefault { .. })
        ));
    }

    #[test]
    fn test_range_kind_mismatch() {
        let installed = patched(|s| key_mut(s, "theme").range = KeyRange::Any);
        assert_eq!(
            verify_source(&installed, &reference()),
            Err(SchemaError::KeyRangeType {
                schema: "org.par-term".into(),
                key: "theme".into(),
                expected: "enum",
                found: "type"
            })
        );
    }

    #[test]
    fn test_range_value_type_mismatch() {
        let installed = patched(|s| {
            key_mut(s, "theme").range = KeyRange::Choices(vec![Value::from("system"), Value::Int32(1)]);
        });
        assert!(matches!(
            verify_source(&installed, &reference()),
            Err(SchemaError::KeyRangeTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_enum_sets_must_match() {
        let installed = patched(|s| {
            key_mut(s, "theme").range = KeyRange::Choices(vec![Value::from("system"), Value::from("dark")]);
        });
        assert!(matches!(
            verify_source(&installed, &reference()),
            Err(SchemaError::KeyRangeEnumValue { .. })
        ));

        // Same members in another order still verify.
        let reordered = patched(|s| {
            key_mut(s, "theme").range = KeyRange::Choices(vec![
                Value::from("light"),
                Value::from("dark"),
                Value::from("system"),
            ]);
        });
        assert_eq!(verify_source(&reordered, &reference()), Ok(()));
    }

    #[test]
    fn test_interval_bounds_must_match() {
        let installed = patched(|s| {
            key_mut(s, "font-scale").range = KeyRange::Interval {
                min: Value::Double(0.25),
                max: Value::Double(8.0),
            };
        });
        assert!(matches!(
            verify_source(&installed, &reference()),
            Err(SchemaError::KeyRangeInterval { .. })
        ));
    }

    #[test]
    fn test_missing_child() {
        let installed = patched(|s| s.children.retain(|c| c.name != "keybindings"));
        assert!(matches!(
            verify_source(&installed, &reference()),
            Err(SchemaError::ChildMissing { .. })
        ));
    }

    #[test]
    fn test_extra_installed_keys_are_tolerated() {
        let installed = patched(|s| {
            s.keys.push(SchemaKey {
                name: "distro-extra".into(),
                value_type: ValueType::Bool,
                default: Value::Bool(false),
                range: KeyRange::Any,
                summary: None,
            })
        });
        assert_eq!(verify_source(&installed, &reference()), Ok(()));
    }

    #[test]
    fn test_select_prefers_verified_installed() {
        let installed = reference();
        let selected = select_schema_source(Some(installed), SchemaSource::bundled()).unwrap();
        assert_eq!(selected.verdict, SchemaVerdict::Verified);
    }

    #[test]
    fn test_select_falls_back_on_divergence() {
        let installed = patched(|s| s.keys.retain(|k| k.name != "font-scale"));
        let selected = select_schema_source(Some(installed), SchemaSource::bundled()).unwrap();
        assert!(matches!(
            selected.verdict,
            SchemaVerdict::FellBack(SchemaError::KeyMissing { .. })
        ));
        assert!(
            selected
                .source
                .lookup("org.par-term")
                .unwrap()
                .key("font-scale")
                .is_some()
        );
    }

    #[test]
    fn test_select_falls_back_when_nothing_installed() {
        let selected = select_schema_source(None, SchemaSource::bundled()).unwrap();
        assert!(matches!(selected.verdict, SchemaVerdict::FellBack(SchemaError::SchemaMissing { .. })));
    }

    #[test]
    fn test_select_trusts_installed_when_reference_broken() {
        let broken = SchemaSource::from_yaml_str("schemas: [", "broken");
        let selected = select_schema_source(Some(reference()), broken).unwrap();
        assert_eq!(selected.verdict, SchemaVerdict::Unverified);

        let broken = SchemaSource::from_yaml_str("schemas: [", "broken");
        assert!(select_schema_source(None, broken).is_err());
    }
}
