//! Startup shared by both binaries: schema selection and opening the store.

use anyhow::{Context, Result};
use par_term_settings::schema::discover_installed;
use par_term_settings::{KeyfileStore, SchemaSource, SchemaVerdict, SelectedSchemas, select_schema_source};

use crate::config::PrefsConfig;

/// Pick the schema source to trust: the installed schemas when they match the
/// reference, the reference otherwise.
pub fn load_schemas(config: &PrefsConfig) -> Result<SelectedSchemas> {
    let installed = match discover_installed(config.schema_dir.as_deref()) {
        Ok(installed) => installed,
        Err(e) => {
            log::error!("Failed to load installed schemas: {e}");
            None
        }
    };
    let reference = match &config.reference_schema_dir {
        Some(dir) => SchemaSource::load_dir(dir),
        None => SchemaSource::bundled(),
    };
    let selected = select_schema_source(installed, reference).context("no usable settings schemas")?;
    if let SchemaVerdict::FellBack(err) = &selected.verdict {
        log::warn!("Using reference schemas: {err}");
    }
    Ok(selected)
}

/// Open the canonical keyfile store.
pub fn open_store(config: &PrefsConfig) -> Result<KeyfileStore> {
    if let Some(parent) = config.keyfile_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
    }
    KeyfileStore::open(&config.keyfile_path)
        .with_context(|| format!("Failed to open settings store {:?}", config.keyfile_path))
}
