//! Scalar and enum types that make up the [`crate::model::Issue`] schema.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of work an issue tracks. Merge class: LWW by `updated_at` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A single unit of work.
    Task,
    /// A container grouping related issues.
    Epic,
    /// A defect report.
    Bug,
    /// A user-facing feature request.
    Feature,
    /// Maintenance work with no direct user impact.
    Chore,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Epic => "epic",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Chore => "chore",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of an issue. Merge class: LWW (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not yet started.
    Open,
    /// Actively being worked.
    InProgress,
    /// Blocked on something outside the issue itself.
    Blocked,
    /// Deliberately postponed until `deferred_until`.
    Deferred,
    /// Done; `closed_at` must be present (invariant I4).
    Closed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Deferred => "deferred",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A dependency edge: `{type, target}`, unique by `target` within a set
/// (§3, merge class `union`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// The relationship kind (e.g. `"blocks"`, `"relates_to"`).
    #[serde(rename = "type")]
    pub dep_type: String,
    /// The id of the issue this dependency points at.
    pub target: String,
}

/// Why [`crate::model::Issue::parse`] or a validator rejected a record.
///
/// Matches `ParseError::Schema` in the parser contract (§4.1): the first
/// failing field is named so callers get an actionable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `id` is not `{prefix}-{26-char ULID}`.
    InvalidId {
        /// The offending value.
        value: String,
    },
    /// `type` is not the fixed tag `"is"`.
    InvalidTypeTag {
        /// The offending value.
        value: String,
    },
    /// A timestamp field is not UTC ISO-8601 with millisecond precision and a `Z` suffix.
    InvalidTimestamp {
        /// Which field failed.
        field: &'static str,
        /// The offending value.
        value: String,
    },
    /// An enum field (`kind`, `status`) held a value outside its closed set.
    InvalidEnumValue {
        /// Which field failed.
        field: &'static str,
        /// The offending value.
        value: String,
    },
    /// Invariant I2: `created_at > updated_at`.
    TimestampOrder {
        /// `created_at`.
        created_at: String,
        /// `updated_at`.
        updated_at: String,
    },
    /// Invariant I4: `status = closed` but `closed_at` is absent.
    MissingClosedAt,
    /// A required field was absent from the parsed document.
    MissingField {
        /// The missing field's name.
        field: &'static str,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidId { value } => {
                write!(f, "invalid id {value:?}: expected `{{prefix}}-{{26-char ULID}}`")
            }
            Self::InvalidTypeTag { value } => {
                write!(f, "invalid type tag {value:?}: expected \"is\"")
            }
            Self::InvalidTimestamp { field, value } => {
                write!(
                    f,
                    "invalid timestamp in field `{field}`: {value:?} (expected UTC ISO-8601 with millisecond precision and trailing Z)"
                )
            }
            Self::InvalidEnumValue { field, value } => {
                write!(f, "invalid value for field `{field}`: {value:?}")
            }
            Self::TimestampOrder {
                created_at,
                updated_at,
            } => {
                write!(
                    f,
                    "created_at ({created_at}) must not be after updated_at ({updated_at})"
                )
            }
            Self::MissingClosedAt => {
                write!(f, "status is `closed` but `closed_at` is missing")
            }
            Self::MissingField { field } => {
                write!(f, "missing required field `{field}`")
            }
        }
    }
}

impl std::error::Error for ValidationError {}
