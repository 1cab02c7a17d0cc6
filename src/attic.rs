//! Attic entries — the append-only audit trail of merge losers (§3, §4.5).
//!
//! Never read back by the core; purely for operator auditing. Filenames are
//! `{entity_id}_{timestamp}_{field}` so entries naturally sort by entity
//! then time.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TbdError;
use crate::parser::format_timestamp;

/// Which side of a merge produced the surviving value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// The local copy's value won.
    Local,
    /// The remote copy's value won.
    Remote,
}

/// Version/timestamp context captured alongside a discarded value, so an
/// operator can reconstruct why a particular side won without re-running
/// the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtticContext {
    /// The local record's `version` at merge time.
    pub local_version: u64,
    /// The remote record's `version` at merge time.
    pub remote_version: u64,
    /// The local record's `updated_at` at merge time.
    pub local_updated_at: DateTime<Utc>,
    /// The remote record's `updated_at` at merge time.
    pub remote_updated_at: DateTime<Utc>,
}

/// An append-only record of a value the merge engine discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtticEntry {
    /// The issue id the discarded value belonged to.
    pub entity_id: String,
    /// When the merge that discarded this value ran.
    pub timestamp: DateTime<Utc>,
    /// Which field was discarded (or `"whole_issue"` for a no-base conflict).
    pub field: String,
    /// The discarded value, serialized as YAML for readability.
    pub lost_value: serde_yaml::Value,
    /// Which side's value survived.
    pub winner_source: Source,
    /// Which side's value was discarded.
    pub loser_source: Source,
    /// Version/timestamp context for the discarded value.
    pub context: AtticContext,
}

impl AtticEntry {
    /// The filename this entry is written under: `{entity_id}_{timestamp}_{field}`.
    #[must_use]
    pub fn filename(&self) -> String {
        format!(
            "{}_{}_{}.yml",
            self.entity_id,
            format_timestamp(self.timestamp).replace(':', "-"),
            self.field
        )
    }
}

/// Append `entry` to the attic directory at `attic_dir`.
///
/// # Errors
/// Any I/O or serialization failure writing the entry file.
pub fn append(attic_dir: &Path, entry: &AtticEntry) -> Result<(), TbdError> {
    fs::create_dir_all(attic_dir)?;
    let path = attic_dir.join(entry.filename());
    let text = serde_yaml::to_string(entry).map_err(|e| TbdError::Config {
        path: path.clone(),
        detail: e.to_string(),
    })?;
    fs::write(path, text)?;
    Ok(())
}
