//! The [`Issue`] record — the unit the whole store replicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;

use super::types::{Dependency, IssueKind, Status, ValidationError};

/// An issue record (§3). Field order here matches the spec's table, not the
/// canonical on-disk ordering — canonical ordering is the serializer's job
/// (§4.1), never the in-memory struct's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Fixed tag, always `"is"`. Merge class: immutable.
    #[serde(rename = "type")]
    pub record_type: String,
    /// `{prefix}-{26-char ULID}`. Merge class: immutable (I1).
    pub id: String,
    /// Creation timestamp. Merge class: immutable.
    pub created_at: DateTime<Utc>,
    /// Creator identity. Merge class: immutable.
    pub created_by: String,
    /// Monotonic version counter. Merge class: max (I3).
    pub version: u64,
    /// Last-modified timestamp. Merge class: max.
    pub updated_at: DateTime<Utc>,
    /// Work category. Merge class: LWW by `updated_at`.
    pub kind: IssueKind,
    /// Title. Merge class: LWW.
    pub title: String,
    /// Long-form description (stored in the body, not front-matter). Merge class: LWW.
    #[serde(skip)]
    pub description: String,
    /// `## Notes` body section. Merge class: LWW.
    #[serde(skip)]
    pub notes: String,
    /// Lifecycle status. Merge class: LWW.
    pub status: Status,
    /// Priority. Merge class: LWW.
    pub priority: i64,
    /// Assignee identity. Merge class: LWW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Parent issue id, if any. Merge class: LWW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Path to a governing spec document. Merge class: LWW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_path: Option<String>,
    /// Why the issue was closed. Merge class: LWW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    /// When the issue was closed (required if `status == closed`, I4). Merge class: LWW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Target completion date. Merge class: LWW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Deferred until this date (meaningful when `status == deferred`). Merge class: LWW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferred_until: Option<DateTime<Utc>>,
    /// Ordering hint for child issues. Merge class: LWW.
    pub child_order_hints: Vec<String>,
    /// Free-form tags. Merge class: union.
    pub labels: Vec<String>,
    /// Outgoing dependency edges, unique by `target`. Merge class: union.
    pub dependencies: Vec<Dependency>,
    /// Opaque forward-compatible data. Merge class: LWW as a whole.
    pub extensions: JsonMap<String, serde_json::Value>,
    /// URL of a linked external tracker issue. Merge class: LWW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_issue_url: Option<String>,
}

impl Issue {
    /// Create a new issue with a freshly allocated ULID, `version = 1`, and
    /// `created_at == updated_at == now`.
    #[must_use]
    pub fn new(prefix: &str, created_by: impl Into<String>, title: impl Into<String>, kind: IssueKind) -> Self {
        let now = Utc::now();
        let ulid = ulid::Ulid::new();
        Self {
            record_type: "is".to_string(),
            id: format!("{prefix}-{}", ulid.to_string().to_lowercase()),
            created_at: now,
            created_by: created_by.into(),
            version: 1,
            updated_at: now,
            kind,
            title: title.into(),
            description: String::new(),
            notes: String::new(),
            status: Status::Open,
            priority: 0,
            assignee: None,
            parent_id: None,
            spec_path: None,
            close_reason: None,
            closed_at: None,
            due_date: None,
            deferred_until: None,
            child_order_hints: Vec::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
            extensions: JsonMap::new(),
            external_issue_url: None,
        }
    }

    /// The 26-char ULID portion of `id`, stripped of its display prefix.
    #[must_use]
    pub fn ulid_part(&self) -> &str {
        self.id.split_once('-').map_or(self.id.as_str(), |(_, ulid)| ulid)
    }

    /// Validate the invariants that only make sense once a record is typed
    /// (id shape, the fixed `type` tag, I2 timestamp order, I4 `closed_at`
    /// presence). Enum membership and raw timestamp shape (also part of the
    /// §4.1 schema-violation contract) are checked earlier, against the
    /// untyped document, in [`crate::parser::parse`] — by the time a `kind`
    /// or `status` value has become [`crate::model::types::IssueKind`] or
    /// [`Status`], an invalid value has already failed to deserialize.
    ///
    /// # Errors
    /// Returns the first failing invariant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.record_type != "is" {
            return Err(ValidationError::InvalidTypeTag {
                value: self.record_type.clone(),
            });
        }
        let (prefix, ulid) = self.id.split_once('-').ok_or_else(|| ValidationError::InvalidId {
            value: self.id.clone(),
        })?;
        if prefix.is_empty() || ulid.len() != 26 {
            return Err(ValidationError::InvalidId { value: self.id.clone() });
        }
        if self.created_at > self.updated_at {
            return Err(ValidationError::TimestampOrder {
                created_at: self.created_at.to_rfc3339(),
                updated_at: self.updated_at.to_rfc3339(),
            });
        }
        if self.status == Status::Closed && self.closed_at.is_none() {
            return Err(ValidationError::MissingClosedAt);
        }
        Ok(())
    }

    /// Bump `version` and `updated_at` for a non-no-op, non-merge write.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_issue_has_matching_timestamps_and_version_one() {
        let issue = Issue::new("proj", "alice", "First", IssueKind::Task);
        assert_eq!(issue.created_at, issue.updated_at);
        assert_eq!(issue.version, 1);
        assert!(issue.validate().is_ok());
    }

    #[test]
    fn validate_rejects_closed_without_closed_at() {
        let mut issue = Issue::new("proj", "alice", "First", IssueKind::Task);
        issue.status = Status::Closed;
        assert_eq!(issue.validate(), Err(ValidationError::MissingClosedAt));
    }

    #[test]
    fn validate_rejects_created_after_updated() {
        let mut issue = Issue::new("proj", "alice", "First", IssueKind::Task);
        issue.created_at = issue.updated_at + chrono::Duration::seconds(1);
        assert!(matches!(issue.validate(), Err(ValidationError::TimestampOrder { .. })));
    }

    #[test]
    fn ulid_part_strips_prefix() {
        let issue = Issue::new("proj", "alice", "First", IssueKind::Task);
        assert_eq!(issue.id, format!("proj-{}", issue.ulid_part()));
    }
}
