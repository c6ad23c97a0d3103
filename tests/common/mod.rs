//! Shared integration test helpers for par-term-prefs.
//!
//! Include with `mod common;` at the top of each test file. The
//! `#![allow(dead_code)]` suppresses warnings when a file uses only some of
//! the helpers.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

use par_term_prefs::config::CONFIG_FILE_NAME;
use par_term_settings::schema::{BUNDLED_SCHEMA, SCHEMA_DIR_ENV};
use tempfile::TempDir;

pub const HOST_EXE: &str = env!("CARGO_BIN_EXE_par-term-prefs");
pub const PREFERENCES_EXE: &str = env!("CARGO_BIN_EXE_par-term-preferences");

/// An isolated settings environment: its own keyfile, schema directory and
/// bridge config, all inside a temp dir.
///
/// Keep the value alive for the whole test; dropping it removes the files.
pub struct TestEnv {
    pub dir: TempDir,
    pub config_path: PathBuf,
    pub keyfile: PathBuf,
    pub schema_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_preferences_executable(PREFERENCES_EXE)
    }

    pub fn with_preferences_executable(program: &str) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let schema_dir = dir.path().join("schemas");
        fs::create_dir_all(&schema_dir).expect("schema dir");
        fs::write(schema_dir.join("org.par-term.yaml"), BUNDLED_SCHEMA).expect("schema file");

        let keyfile = dir.path().join("settings.yaml");
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &config_path,
            format!(
                "keyfile_path: {}\npreferences_executable: {}\nbridge:\n  startup_timeout_ms: 10000\n",
                keyfile.display(),
                program
            ),
        )
        .expect("config file");

        Self {
            dir,
            config_path,
            keyfile,
            schema_dir,
        }
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.env(SCHEMA_DIR_ENV, &self.schema_dir)
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(&self.config_path);
        cmd
    }

    /// Run the host with `args` passed through to the preferences process.
    pub fn host(&self, args: &[&str]) -> Output {
        self.command(HOST_EXE)
            .arg("--")
            .args(args)
            .output()
            .expect("run par-term-prefs")
    }

    /// Run the host in standalone mode.
    pub fn host_standalone(&self, args: &[&str]) -> Output {
        self.command(HOST_EXE)
            .arg("--standalone")
            .arg("--")
            .args(args)
            .output()
            .expect("run par-term-prefs")
    }

    /// Run the preferences process directly against the keyfile.
    pub fn preferences(&self, args: &[&str]) -> Output {
        self.command(PREFERENCES_EXE)
            .args(args)
            .output()
            .expect("run par-term-preferences")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
