//! Multi-key writes with directory erasure.
//!
//! The store has no bulk-erase primitive, so erasing a directory resets every
//! key the schemas place below it, one at a time. Keys below the directory
//! that no schema knows about (orphans from older versions, or instances of a
//! mount that is above the erased directory) are left in place.

use par_term_settings::{OriginTag, SchemaSource, SettingsStore, Value, is_dir, is_key};

/// One step of a tree write, in submission order.
enum TreeStep {
    /// Consecutive concrete entries, written atomically together.
    Write(Vec<(String, Option<Value>)>),
    /// Reset every known key below the directory.
    Erase(String),
}

/// Validate `entries` and group them into steps.
fn plan(store: &dyn SettingsStore, entries: Vec<(String, Option<Value>)>) -> Option<Vec<TreeStep>> {
    let mut steps: Vec<TreeStep> = Vec::new();
    for (path, value) in entries {
        if is_dir(&path) {
            if value.is_some() {
                log::warn!("Tree write gives a value to directory {path}; rejecting");
                return None;
            }
            if !store.get_permission(&path).allowed {
                log::info!("Tree write rejected: {path} is locked");
                return None;
            }
            steps.push(TreeStep::Erase(path));
        } else if is_key(&path) {
            if !store.get_writable(&path) {
                log::info!("Tree write rejected: {path} is not writable");
                return None;
            }
            match steps.last_mut() {
                Some(TreeStep::Write(batch)) => batch.push((path, value)),
                _ => steps.push(TreeStep::Write(vec![(path, value)])),
            }
        } else {
            log::warn!("Tree write names invalid path '{path}'; rejecting");
            return None;
        }
    }
    Some(steps)
}

/// Apply a tree write against `store`.
///
/// `entries` carry absolute paths. An entry whose path is a directory and
/// whose value is absent erases that directory; every other entry must be a
/// concrete key. Entries take effect in the order given, so a key written
/// after an erasure of its directory keeps the new value. Runs of concrete
/// entries are written atomically.
///
/// Every path is checked before anything is applied; returns `false`
/// without touching the store when one is invalid, locked or not writable.
pub fn apply_write_tree(
    store: &dyn SettingsStore,
    schemas: &SchemaSource,
    entries: Vec<(String, Option<Value>)>,
    origin: Option<OriginTag>,
) -> bool {
    let Some(steps) = plan(store, entries) else {
        return false;
    };

    for step in steps {
        match step {
            TreeStep::Write(batch) => {
                if !store.write_tree(batch, origin) {
                    log::warn!("Tree write stopped: the store refused a batch");
                    return false;
                }
            }
            TreeStep::Erase(dir) => {
                let keys = schemas.known_keys_under(&dir);
                log::info!(
                    "Erasing {dir}: resetting {} known key(s); keys unknown to the schemas are kept",
                    keys.len()
                );
                for key in keys {
                    store.reset(&key, origin);
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use par_term_settings::{KeyfileStore, ValueType};

    const PROFILE: &str = "/org/par-term/profiles:/:abc/";

    fn store_with_profile() -> KeyfileStore {
        let store = KeyfileStore::in_memory();
        store.write(&format!("{PROFILE}visible-name"), Some(Value::from("Work")), None);
        store.write(&format!("{PROFILE}font"), Some(Value::from("Mono 10")), None);
        store.write(&format!("{PROFILE}orphan"), Some(Value::Bool(true)), None);
        store
    }

    #[test]
    fn test_erase_resets_known_keys_only() {
        let store = store_with_profile();
        let schemas = SchemaSource::bundled().unwrap();
        assert!(apply_write_tree(&store, &schemas, vec![(PROFILE.to_string(), None)], None));
        assert_eq!(
            store.read(&format!("{PROFILE}visible-name"), &ValueType::String, false),
            None
        );
        assert_eq!(store.read(&format!("{PROFILE}font"), &ValueType::String, false), None);
        // Not in any schema, so it survives.
        assert_eq!(
            store.read(&format!("{PROFILE}orphan"), &ValueType::Bool, false),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn test_concrete_and_erase_mixed() {
        let store = store_with_profile();
        let schemas = SchemaSource::bundled().unwrap();
        let ok = apply_write_tree(
            &store,
            &schemas,
            vec![
                (PROFILE.to_string(), None),
                ("/org/par-term/theme".to_string(), Some(Value::from("dark"))),
            ],
            None,
        );
        assert!(ok);
        assert_eq!(
            store.read("/org/par-term/theme", &ValueType::String, false),
            Some(Value::from("dark"))
        );
    }

    #[test]
    fn test_entries_apply_in_order() {
        let schemas = SchemaSource::bundled().unwrap();
        let name = format!("{PROFILE}visible-name");

        let store = store_with_profile();
        let ok = apply_write_tree(
            &store,
            &schemas,
            vec![
                (PROFILE.to_string(), None),
                (name.clone(), Some(Value::from("New"))),
            ],
            None,
        );
        assert!(ok);
        assert_eq!(store.read(&name, &ValueType::String, false), Some(Value::from("New")));
        assert_eq!(store.read(&format!("{PROFILE}font"), &ValueType::String, false), None);

        let store = store_with_profile();
        let ok = apply_write_tree(
            &store,
            &schemas,
            vec![
                (name.clone(), Some(Value::from("New"))),
                (PROFILE.to_string(), None),
            ],
            None,
        );
        assert!(ok);
        assert_eq!(store.read(&name, &ValueType::String, false), None);
    }

    #[test]
    fn test_unwritable_key_rejects_before_erasing() {
        let store = store_with_profile();
        store.lock("/org/par-term/theme");
        let schemas = SchemaSource::bundled().unwrap();
        let ok = apply_write_tree(
            &store,
            &schemas,
            vec![
                (PROFILE.to_string(), None),
                ("/org/par-term/theme".to_string(), Some(Value::from("dark"))),
            ],
            None,
        );
        assert!(!ok);
        assert_eq!(
            store.read(&format!("{PROFILE}visible-name"), &ValueType::String, false),
            Some(Value::from("Work"))
        );
    }

    #[test]
    fn test_locked_directory_rejects_everything() {
        let store = store_with_profile();
        store.lock(PROFILE);
        let schemas = SchemaSource::bundled().unwrap();
        let ok = apply_write_tree(
            &store,
            &schemas,
            vec![
                ("/org/par-term/theme".to_string(), Some(Value::from("dark"))),
                (PROFILE.to_string(), None),
            ],
            None,
        );
        assert!(!ok);
        assert_eq!(store.read("/org/par-term/theme", &ValueType::String, false), None);
    }

    #[test]
    fn test_directory_with_value_is_rejected() {
        let store = KeyfileStore::in_memory();
        let schemas = SchemaSource::bundled().unwrap();
        assert!(!apply_write_tree(
            &store,
            &schemas,
            vec![(PROFILE.to_string(), Some(Value::Bool(true)))],
            None
        ));
    }
}
