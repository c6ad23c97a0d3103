//! Type-directed conversion between [`Value`] and YAML.
//!
//! YAML carries no type information of its own, so every conversion is
//! driven by the declared [`ValueType`]: schema defaults, range choices and
//! the keyfile store all go through here.
//!
//! A `nothing` maybe is written as YAML `null`. Nested maybes therefore
//! collapse: `just nothing` and `nothing` both serialize to `null` and read
//! back as the outer `nothing`.

use std::collections::BTreeMap;

use serde_yaml_ng::{Mapping, Number, Value as Yaml};

use crate::error::SettingsError;
use crate::value::{Value, ValueType};

impl Value {
    /// Read a YAML node as a value of the given type.
    pub fn from_yaml(yaml: &Yaml, ty: &ValueType) -> Result<Self, SettingsError> {
        value_from_yaml(yaml, ty)
    }

    pub fn to_yaml(&self) -> Yaml {
        value_to_yaml(self)
    }
}

/// Convert a YAML node into a value of type `ty`.
pub fn value_from_yaml(yaml: &Yaml, ty: &ValueType) -> Result<Value, SettingsError> {
    let mismatch = |what: &str| SettingsError::invalid_value(ty, format!("{what}, found {}", describe(yaml)));
    match ty {
        ValueType::Bool => yaml.as_bool().map(Value::Bool).ok_or_else(|| mismatch("expected a boolean")),
        ValueType::Int16 => int_from_yaml(yaml, ty).map(Value::Int16),
        ValueType::UInt16 => int_from_yaml(yaml, ty).map(Value::UInt16),
        ValueType::Int32 => int_from_yaml(yaml, ty).map(Value::Int32),
        ValueType::UInt32 => int_from_yaml(yaml, ty).map(Value::UInt32),
        ValueType::Int64 => int_from_yaml(yaml, ty).map(Value::Int64),
        ValueType::UInt64 => int_from_yaml(yaml, ty).map(Value::UInt64),
        ValueType::Double => yaml.as_f64().map(Value::Double).ok_or_else(|| mismatch("expected a number")),
        ValueType::String => yaml
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| mismatch("expected a string")),
        ValueType::Bytes => {
            let seq = yaml.as_sequence().ok_or_else(|| mismatch("expected a list of bytes"))?;
            seq.iter()
                .map(|b| int_from_yaml::<u8>(b, ty))
                .collect::<Result<Vec<u8>, _>>()
                .map(Value::Bytes)
        }
        ValueType::Tuple(members) => {
            let seq = yaml.as_sequence().ok_or_else(|| mismatch("expected a list"))?;
            if seq.len() != members.len() {
                return Err(SettingsError::invalid_value(
                    ty,
                    format!("expected {} members, found {}", members.len(), seq.len()),
                ));
            }
            seq.iter()
                .zip(members)
                .map(|(y, t)| value_from_yaml(y, t))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple)
        }
        ValueType::Array(element) => {
            let seq = yaml.as_sequence().ok_or_else(|| mismatch("expected a list"))?;
            let items = seq
                .iter()
                .map(|y| value_from_yaml(y, element))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array {
                element_type: (**element).clone(),
                items,
            })
        }
        ValueType::Dict(value_type) => {
            let map = yaml.as_mapping().ok_or_else(|| mismatch("expected a mapping"))?;
            let mut entries = BTreeMap::new();
            for (k, v) in map {
                let key = k
                    .as_str()
                    .ok_or_else(|| SettingsError::invalid_value(ty, "dictionary keys must be strings"))?;
                entries.insert(key.to_string(), value_from_yaml(v, value_type)?);
            }
            Ok(Value::Dict {
                value_type: (**value_type).clone(),
                entries,
            })
        }
        ValueType::Maybe(inner) => {
            if yaml.is_null() {
                Ok(Value::nothing((**inner).clone()))
            } else {
                Ok(Value::Maybe {
                    inner_type: (**inner).clone(),
                    value: Some(Box::new(value_from_yaml(yaml, inner)?)),
                })
            }
        }
    }
}

fn int_from_yaml<T>(yaml: &Yaml, ty: &ValueType) -> Result<T, SettingsError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    let converted = if let Some(v) = yaml.as_i64() {
        T::try_from(v).ok()
    } else if let Some(v) = yaml.as_u64() {
        T::try_from(v).ok()
    } else {
        return Err(SettingsError::invalid_value(
            ty,
            format!("expected an integer, found {}", describe(yaml)),
        ));
    };
    converted.ok_or_else(|| SettingsError::invalid_value(ty, "integer out of range for type"))
}

fn describe(yaml: &Yaml) -> &'static str {
    match yaml {
        Yaml::Null => "null",
        Yaml::Bool(_) => "a boolean",
        Yaml::Number(_) => "a number",
        Yaml::String(_) => "a string",
        Yaml::Sequence(_) => "a list",
        Yaml::Mapping(_) => "a mapping",
        Yaml::Tagged(_) => "a tagged value",
    }
}

/// Convert a value into its YAML form.
pub fn value_to_yaml(value: &Value) -> Yaml {
    match value {
        Value::Bool(b) => Yaml::Bool(*b),
        Value::Int16(v) => Yaml::Number(Number::from(i64::from(*v))),
        Value::UInt16(v) => Yaml::Number(Number::from(u64::from(*v))),
        Value::Int32(v) => Yaml::Number(Number::from(i64::from(*v))),
        Value::UInt32(v) => Yaml::Number(Number::from(u64::from(*v))),
        Value::Int64(v) => Yaml::Number(Number::from(*v)),
        Value::UInt64(v) => Yaml::Number(Number::from(*v)),
        Value::Double(v) => Yaml::Number(Number::from(*v)),
        Value::String(s) => Yaml::String(s.clone()),
        Value::Bytes(bytes) => Yaml::Sequence(
            bytes
                .iter()
                .map(|b| Yaml::Number(Number::from(u64::from(*b))))
                .collect(),
        ),
        Value::Tuple(members) => Yaml::Sequence(members.iter().map(value_to_yaml).collect()),
        Value::Array { items, .. } => Yaml::Sequence(items.iter().map(value_to_yaml).collect()),
        Value::Dict { entries, .. } => {
            let mut map = Mapping::new();
            for (k, v) in entries {
                map.insert(Yaml::String(k.clone()), value_to_yaml(v));
            }
            Yaml::Mapping(map)
        }
        Value::Maybe { value: None, .. } => Yaml::Null,
        Value::Maybe {
            value: Some(inner), ..
        } => value_to_yaml(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Yaml {
        serde_yaml_ng::from_str(text).unwrap()
    }

    #[test]
    fn test_scalars_follow_declared_type() {
        let ty = ValueType::UInt32;
        assert_eq!(value_from_yaml(&parse("3"), &ty).unwrap(), Value::UInt32(3));
        assert!(value_from_yaml(&parse("-3"), &ty).is_err());
        assert_eq!(value_from_yaml(&parse("2"), &ValueType::Double).unwrap(), Value::Double(2.0));
        assert!(value_from_yaml(&parse("70000"), &ValueType::Int16).is_err());
        assert!(value_from_yaml(&parse("yes-please"), &ValueType::Bool).is_err());
    }

    #[test]
    fn test_containers() {
        let ty = ValueType::parse("a{sas}").unwrap();
        let v = value_from_yaml(&parse("{b: [x], a: []}"), &ty).unwrap();
        let Value::Dict { entries, .. } = &v else {
            panic!("expected dict");
        };
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(value_from_yaml(&value_to_yaml(&v), &ty).unwrap(), v);

        let tuple = ValueType::parse("(ii)").unwrap();
        assert!(value_from_yaml(&parse("[1, 2, 3]"), &tuple).is_err());
    }

    #[test]
    fn test_maybe_null() {
        let ty = ValueType::parse("ms").unwrap();
        assert_eq!(
            value_from_yaml(&Yaml::Null, &ty).unwrap(),
            Value::nothing(ValueType::String)
        );
        let just = value_from_yaml(&parse("'#ffffff'"), &ty).unwrap();
        assert_eq!(just, Value::just(Value::from("#ffffff")));
        assert_eq!(value_to_yaml(&Value::nothing(ValueType::String)), Yaml::Null);
    }
}
