//! Settings commands run by the preferences process.
//!
//! Every command goes through a [`SettingsBackend`], so the same code runs
//! over the bridge and against a directly opened store.

use std::io::Write;

use anyhow::Result;
use par_term_settings::{SchemaSource, Value, is_dir, split_key};
use par_term_settings_bridge::{Settings, SettingsBackend};
use thiserror::Error;

use crate::cli::PrefsCommand;

/// Command failures that are the user's input rather than the store's.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("'{0}' is not a key path")]
    InvalidKey(String),

    #[error("'{0}' is not a directory path")]
    InvalidDir(String),

    #[error("No schema covers '{0}'")]
    NoSchema(String),

    #[error("'{0}' is not writable")]
    NotWritable(String),

    #[error("Cannot parse '{text}' as a value: {source}")]
    Parse {
        text: String,
        #[source]
        source: serde_yaml_ng::Error,
    },
}

/// Settings for the schema whose keys live in `dir`.
fn settings_at(backend: &SettingsBackend, schemas: &SchemaSource, dir: &str) -> Result<Settings> {
    let schema = schemas
        .schema_at(dir)
        .ok_or_else(|| CommandError::NoSchema(dir.to_string()))?;
    Ok(Settings::new_with_path(backend.clone(), schemas, &schema.id, dir)?)
}

fn settings_for_key<'k>(
    backend: &SettingsBackend,
    schemas: &SchemaSource,
    key: &'k str,
) -> Result<(Settings, &'k str)> {
    let (dir, name) = split_key(key).ok_or_else(|| CommandError::InvalidKey(key.to_string()))?;
    Ok((settings_at(backend, schemas, dir)?, name))
}

/// Split `dir` into its parent directory and its own name with trailing
/// separator: `/a/b/` becomes `("/a/", "b/")`.
fn split_dir(dir: &str) -> Option<(&str, &str)> {
    if !is_dir(dir) || dir == "/" {
        return None;
    }
    let trimmed = &dir[..dir.len() - 1];
    let idx = trimmed.rfind('/')?;
    Some((&dir[..=idx], &dir[idx + 1..]))
}

/// Run one command, writing its output to `out`. Returns the exit code.
pub async fn run(
    backend: &SettingsBackend,
    schemas: &SchemaSource,
    command: PrefsCommand,
    out: &mut dyn Write,
) -> Result<i32> {
    log::info!("Running {:?}", command);
    let mutating = command.is_mutating();

    match command {
        PrefsCommand::Get { key } => {
            let (settings, name) = settings_for_key(backend, schemas, &key)?;
            writeln!(out, "{}", settings.get(name).await?)?;
        }
        PrefsCommand::Set { key, value } => {
            let (settings, name) = settings_for_key(backend, schemas, &key)?;
            let info = settings.key_info(name)?;
            let yaml: serde_yaml_ng::Value =
                serde_yaml_ng::from_str(&value).map_err(|source| CommandError::Parse {
                    text: value.clone(),
                    source,
                })?;
            let value = Value::from_yaml(&yaml, &info.value_type)?;
            if !settings.set(name, value).await? {
                return Err(CommandError::NotWritable(key).into());
            }
        }
        PrefsCommand::Reset { key } => {
            let (settings, name) = settings_for_key(backend, schemas, &key)?;
            settings.reset(name).await?;
        }
        PrefsCommand::List { dir } => {
            if !is_dir(&dir) {
                return Err(CommandError::InvalidDir(dir).into());
            }
            let settings = settings_at(backend, schemas, &dir)?;
            for name in settings.keys() {
                let value = settings.get(name).await?;
                if settings.get_user_value(name).await?.is_some() {
                    writeln!(out, "{name} = {value} (user)")?;
                } else {
                    writeln!(out, "{name} = {value}")?;
                }
            }
            if let Some(schema) = schemas.lookup(settings.schema_id()) {
                for child in &schema.children {
                    writeln!(out, "{}/", child.name)?;
                }
            }
        }
        PrefsCommand::Erase { dir } => {
            let (parent, rel) = split_dir(&dir).ok_or_else(|| CommandError::InvalidDir(dir.clone()))?;
            if !backend.write_tree(parent, vec![(rel.to_string(), None)]).await? {
                return Err(CommandError::NotWritable(dir).into());
            }
        }
        PrefsCommand::Writable { key } => {
            let (settings, name) = settings_for_key(backend, schemas, &key)?;
            writeln!(out, "{}", settings.is_writable(name).await?)?;
        }
    }

    if mutating {
        backend.sync().await?;
    }
    Ok(0)
}
