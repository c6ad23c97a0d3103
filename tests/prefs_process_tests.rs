//! End-to-end tests: the host launches the real preferences binary over the
//! settings bridge.

mod common;

use common::{TestEnv, stderr, stdout};
use par_term_prefs::host::EXIT_UNAVAILABLE;
use par_term_settings::{KeyfileStore, SettingsStore, Value, ValueType};

#[test]
fn test_get_over_bridge_prints_default() {
    let env = TestEnv::new();
    let output = env.host(&["get", "/org/par-term/theme"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "'system'\n");
}

#[test]
fn test_set_over_bridge_reaches_host_keyfile() {
    let env = TestEnv::new();
    let output = env.host(&["set", "/org/par-term/theme", "dark"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let store = KeyfileStore::open(&env.keyfile).unwrap();
    assert_eq!(
        store.read("/org/par-term/theme", &ValueType::String, false),
        Some(Value::from("dark"))
    );

    let output = env.host(&["get", "/org/par-term/theme"]);
    assert_eq!(stdout(&output), "'dark'\n");
}

#[test]
fn test_rejected_value_over_bridge_fails() {
    let env = TestEnv::new();
    let output = env.host(&["set", "/org/par-term/font-scale", "9.0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("outside the range"), "stderr: {}", stderr(&output));
    assert!(!env.keyfile.exists() || {
        let store = KeyfileStore::open(&env.keyfile).unwrap();
        store.read("/org/par-term/font-scale", &ValueType::Double, false).is_none()
    });
}

#[test]
fn test_list_and_erase_profile_over_bridge() {
    let env = TestEnv::new();
    let key = "/org/par-term/profiles:/:work/visible-name";
    assert!(env.host(&["set", key, "Work"]).status.success());

    let listing = stdout(&env.host(&["list", "/org/par-term/profiles:/:work/"]));
    assert!(listing.contains("visible-name = 'Work' (user)"), "listing: {listing}");

    assert!(env.host(&["erase", "/org/par-term/profiles:/:work/"]).status.success());
    assert_eq!(stdout(&env.host(&["get", key])), "'Unnamed'\n");
}

#[test]
fn test_missing_preferences_executable_is_unavailable() {
    let env = TestEnv::with_preferences_executable("/nonexistent/par-term-preferences");
    let output = env.host(&["get", "/org/par-term/theme"]);
    assert_eq!(output.status.code(), Some(EXIT_UNAVAILABLE));
    assert!(stderr(&output).contains("preferences unavailable"));
}

#[test]
fn test_standalone_mode_opens_store_directly() {
    let env = TestEnv::new();
    let output = env.host_standalone(&["set", "/org/par-term/confirm-close", "false"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&env.preferences(&["get", "/org/par-term/confirm-close"])), "false\n");
}

#[test]
fn test_preferences_with_bad_descriptor_fails() {
    let env = TestEnv::new();
    let output = env.preferences(&["--bus-fd=57", "get", "/org/par-term/theme"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Settings bridge unavailable"));
}
