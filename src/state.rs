//! Local state (`.tbd/state.yml`, §3) — never tracked by the store itself,
//! recording side effects of sync such as `last_sync_at`.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TbdError;

/// Local, untracked state recording sync side effects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    /// When `sync` last completed (successfully or with a classified
    /// failure that still updated state).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// When the out-of-scope doc cache last synced; preserved here purely
    /// so that component, if present, need not maintain its own state file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_doc_sync_at: Option<DateTime<Utc>>,
}

impl LocalState {
    /// Load state from `path`, defaulting to an empty state if absent.
    ///
    /// # Errors
    /// Any I/O error other than the file being absent, or malformed YAML.
    pub fn load(path: &Path) -> Result<Self, TbdError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        serde_yaml::from_str(&raw).map_err(|e| TbdError::Config {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Write state to `path`.
    ///
    /// # Errors
    /// Any I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), TbdError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(self).map_err(|e| TbdError::Config {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        fs::write(path, text)?;
        Ok(())
    }
}
