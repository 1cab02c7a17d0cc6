//! Versioned configuration document (`.tbd/config.yml`, §3/§6).
//!
//! Follows the teacher's `src/config.rs` + `src/upgrade.rs` split: a
//! `deny_unknown_fields` struct per format version, loaded through a
//! forward-only, idempotent chain of registered migration steps.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TbdError;

/// The current on-disk format. Bumped whenever the document shape changes.
pub const CURRENT_FORMAT: u32 = 1;

fn default_branch() -> String {
    "tbd-sync".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

const fn default_true() -> bool {
    true
}

/// Sync-related settings consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    /// Name of the auxiliary branch (default `tbd-sync`).
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Name of the configured remote (default `origin`).
    #[serde(default = "default_remote")]
    pub remote: String,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            remote: default_remote(),
        }
    }
}

/// Display-facing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplaySection {
    /// 1-16 lowercase alphanumerics/hyphens, prefixed to every id.
    pub id_prefix: String,
}

/// General behavioral toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsSection {
    /// Whether commands implicitly trigger a sync (default on).
    #[serde(default = "default_true")]
    pub auto_sync: bool,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self { auto_sync: true }
    }
}

/// The configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Format version of this document.
    pub format: u32,
    /// Sync branch/remote settings.
    #[serde(default)]
    pub sync: SyncSection,
    /// Display settings.
    pub display: DisplaySection,
    /// General toggles.
    #[serde(default)]
    pub settings: SettingsSection,
    /// Opaque sub-document for the out-of-scope doc cache; preserved
    /// byte-for-byte across loads/migrations, never interpreted here.
    #[serde(default)]
    pub doc_cache: serde_yaml::Value,
}

impl Config {
    /// A fresh default configuration for `tbd init`.
    #[must_use]
    pub fn new(id_prefix: impl Into<String>) -> Self {
        Self {
            format: CURRENT_FORMAT,
            sync: SyncSection::default(),
            display: DisplaySection {
                id_prefix: id_prefix.into(),
            },
            settings: SettingsSection::default(),
            doc_cache: serde_yaml::Value::Null,
        }
    }
}

type MigrationFn = fn(serde_yaml::Mapping) -> serde_yaml::Mapping;

/// One registered forward-only migration step, identified by the format it
/// migrates *from*.
struct MigrationStep {
    from: u32,
    description: &'static str,
    apply: MigrationFn,
}

/// No migrations are registered yet: format 1 is the only shape this crate
/// has ever shipped. New steps are appended here as the format evolves,
/// each one migrating from its `from` version to `from + 1`.
const fn migrations() -> Vec<MigrationStep> {
    Vec::new()
}

/// Load the configuration at `path`, applying any pending migrations.
///
/// Rewrites the file if the format changed. Idempotent: a document already
/// at [`CURRENT_FORMAT`] loads with zero migration steps applied.
///
/// # Errors
/// Any I/O failure, or [`TbdError::Config`] on malformed YAML.
pub fn load(path: &Path) -> Result<Config, TbdError> {
    let raw = fs::read_to_string(path).map_err(TbdError::Io)?;
    let mut value: serde_yaml::Value = serde_yaml::from_str(&raw).map_err(|e| TbdError::Config {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let mut format = value
        .get("format")
        .and_then(serde_yaml::Value::as_u64)
        .map_or(1, |f| u32::try_from(f).unwrap_or(u32::MAX));

    let mut migrated = false;
    for step in migrations() {
        if step.from == format {
            let serde_yaml::Value::Mapping(mapping) = value else {
                break;
            };
            let next = (step.apply)(mapping);
            tracing::info!(from = step.from, description = step.description, "migrated config");
            format = step.from + 1;
            value = serde_yaml::Value::Mapping(next);
            migrated = true;
        }
    }

    if let serde_yaml::Value::Mapping(mapping) = &mut value {
        mapping.insert(
            serde_yaml::Value::String("format".to_string()),
            serde_yaml::Value::Number(format.into()),
        );
    }

    let config: Config = serde_yaml::from_value(value).map_err(|e| TbdError::Config {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    if migrated {
        save(path, &config)?;
    }
    Ok(config)
}

/// Write the configuration document to `path`.
///
/// # Errors
/// Any I/O failure, or serialization failure (unexpected: `Config` always
/// serializes cleanly).
pub fn save(path: &Path, config: &Config) -> Result<(), TbdError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_yaml::to_string(config).map_err(|e| TbdError::Config {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    fs::write(path, text)?;
    Ok(())
}
