//! Canonical parsing and serialization of issue records (§4.1).
//!
//! The on-disk shape is a YAML front-matter block delimited by `---` lines,
//! followed by a body that splits at the first `## Notes` heading into
//! `description` and `notes`. Canonical emission builds the front-matter as
//! a [`serde_yaml::Mapping`] with keys inserted in ascending Unicode order
//! (so `serde_yaml`'s insertion-ordered writer emits them in that order)
//! rather than leaning on `serde_yaml`'s own (arbitrary) key ordering —
//! the byte-exact round-trip contract needs a fixed order the generic
//! serializer does not promise on its own.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_yaml::value::Value as YamlValue;

use crate::model::types::{Dependency, ValidationError};
use crate::model::Issue;

/// Failure modes for [`parse`], matching the §4.1 contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Missing the opening or closing `---` delimiter.
    Format(String),
    /// The front-matter block is not valid YAML.
    Structured(String),
    /// The front-matter parsed but failed schema validation.
    Schema(ValidationError),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(msg) => write!(f, "format error: {msg}"),
            Self::Structured(msg) => write!(f, "structured parse error: {msg}"),
            Self::Schema(err) => write!(f, "schema error: {err}"),
        }
    }
}

impl std::error::Error for ParseError {}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Parse an issue record from its canonical or tolerated on-disk form.
///
/// # Errors
/// See [`ParseError`]: missing delimiters, invalid YAML, or a schema
/// violation (reported against the first failing field).
pub fn parse(raw: &str) -> Result<Issue, ParseError> {
    let text = normalize_newlines(raw);
    let rest = text
        .strip_prefix("---\n")
        .ok_or_else(|| ParseError::Format("missing opening `---` delimiter".to_string()))?;

    let mut lines = rest.split('\n');
    let mut front_matter = String::new();
    let mut found_close = false;
    let mut consumed = 0usize;
    for line in rest.split_inclusive('\n') {
        consumed += line.len();
        if line == "---\n" || line == "---" {
            found_close = true;
            break;
        }
        front_matter.push_str(line);
    }
    let _ = &mut lines;
    if !found_close {
        return Err(ParseError::Format("missing closing `---` delimiter".to_string()));
    }
    let body = &rest[consumed..];

    let yaml: serde_yaml::Mapping = serde_yaml::from_str(&front_matter)
        .map_err(|e| ParseError::Structured(e.to_string()))?;

    let (description, notes) = split_body(body);

    let mut issue = issue_from_mapping(&yaml)?;
    issue.description = description;
    issue.notes = notes;

    issue.validate().map_err(ParseError::Schema)?;
    Ok(issue)
}

/// Required front-matter keys, in the order `validate_schema_shape` checks
/// them (matches [`Issue`]'s field order).
const REQUIRED_FIELDS: &[&str] = &[
    "type",
    "id",
    "created_at",
    "created_by",
    "version",
    "updated_at",
    "kind",
    "title",
    "status",
    "priority",
    "child_order_hints",
    "labels",
    "dependencies",
    "extensions",
];

const VALID_KINDS: &[&str] = &["task", "epic", "bug", "feature", "chore"];
const VALID_STATUSES: &[&str] = &["open", "in_progress", "blocked", "deferred", "closed"];

/// Timestamp-bearing fields, checked for I5 shape (UTC ISO-8601, millisecond
/// precision, trailing `Z`) when present.
const TIMESTAMP_FIELDS: &[&str] = &["created_at", "updated_at", "closed_at", "due_date", "deferred_until"];

/// Valid per invariant I5 iff parsing and re-formatting it canonically
/// reproduces the original string byte-for-byte.
fn is_valid_timestamp_shape(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value)
        .is_ok_and(|dt| format_timestamp(dt.with_timezone(&Utc)) == value)
}

/// Schema-shape checks (§4.1: "type, enum, timestamp shape, id shape") that
/// must run against the raw document, before typed deserialization — once a
/// field is deserialized into [`crate::model::types::IssueKind`] or
/// [`Status`], an invalid enum value has already become a deserialize error
/// rather than a named schema violation.
fn validate_schema_shape(value: &serde_json::Value) -> Result<(), ValidationError> {
    let obj = value.as_object();

    for field in REQUIRED_FIELDS {
        if obj.is_none_or(|o| !o.contains_key(*field)) {
            return Err(ValidationError::MissingField { field });
        }
    }

    let kind = obj.and_then(|o| o.get("kind")).and_then(serde_json::Value::as_str);
    if let Some(kind) = kind.filter(|k| !VALID_KINDS.contains(k)) {
        return Err(ValidationError::InvalidEnumValue {
            field: "kind",
            value: kind.to_string(),
        });
    }
    let status = obj.and_then(|o| o.get("status")).and_then(serde_json::Value::as_str);
    if let Some(status) = status.filter(|s| !VALID_STATUSES.contains(s)) {
        return Err(ValidationError::InvalidEnumValue {
            field: "status",
            value: status.to_string(),
        });
    }

    for field in TIMESTAMP_FIELDS {
        let ts = obj.and_then(|o| o.get(*field)).and_then(serde_json::Value::as_str);
        if let Some(ts) = ts.filter(|ts| !is_valid_timestamp_shape(ts)) {
            return Err(ValidationError::InvalidTimestamp { field, value: ts.to_string() });
        }
    }

    Ok(())
}

fn split_body(body: &str) -> (String, String) {
    let lower = body.to_lowercase();
    find_notes_heading(&lower).map_or_else(
        || (body.trim().to_string(), String::new()),
        |idx| {
            let heading_end = body[idx..].find('\n').map_or(body.len(), |n| idx + n + 1);
            (body[..idx].trim().to_string(), body[heading_end..].trim().to_string())
        },
    )
}

fn find_notes_heading(lower_body: &str) -> Option<usize> {
    for (idx, line) in line_starts(lower_body) {
        if line.trim_end() == "## notes" {
            return Some(idx);
        }
    }
    None
}

fn line_starts(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0usize;
    text.split('\n').map(move |line| {
        let start = offset;
        offset += line.len() + 1;
        (start, line)
    })
}

fn issue_from_mapping(map: &serde_yaml::Mapping) -> Result<Issue, ParseError> {
    let json_value = serde_json::to_value(map).map_err(|e| ParseError::Structured(e.to_string()))?;
    validate_schema_shape(&json_value).map_err(ParseError::Schema)?;
    let mut issue: Issue =
        serde_json::from_value(json_value).map_err(|e| ParseError::Structured(e.to_string()))?;
    issue.description = String::new();
    issue.notes = String::new();
    Ok(issue)
}

/// Serialize an issue to its canonical on-disk byte representation.
///
/// `serialize(parse(serialize(r))) == serialize(r)` for any valid `r`.
#[must_use]
pub fn serialize(issue: &Issue) -> String {
    serialize_inner(issue, false)
}

/// The canonical-for-hash variant (§4.1): additionally sorts `labels` and
/// `dependencies`, omits `version`, and omits undefined optionals.
#[must_use]
pub fn serialize_for_hash(issue: &Issue) -> String {
    let mut sorted = issue.clone();
    sorted.labels.sort();
    sorted.dependencies.sort_by(|a, b| a.target.cmp(&b.target));
    serialize_inner(&sorted, true)
}

fn serialize_inner(issue: &Issue, for_hash: bool) -> String {
    let mapping = front_matter_mapping(issue, for_hash);
    let yaml = serde_yaml::to_string(&YamlValue::Mapping(mapping)).unwrap_or_default();
    let yaml = yaml.strip_prefix("---\n").unwrap_or(&yaml);

    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(yaml.trim_end());
    out.push('\n');
    out.push_str("---\n");

    let description = issue.description.trim();
    if !description.is_empty() {
        out.push_str(description);
        out.push('\n');
    }
    if !issue.notes.trim().is_empty() {
        if !description.is_empty() {
            out.push('\n');
        }
        out.push_str("## Notes\n\n");
        out.push_str(issue.notes.trim());
        out.push('\n');
    }
    normalize_newlines(&out)
}

fn opt_str(value: Option<&String>) -> YamlValue {
    value.map_or(YamlValue::Null, |v| YamlValue::String(v.clone()))
}

fn opt_ts(value: Option<DateTime<Utc>>) -> YamlValue {
    value.map_or(YamlValue::Null, |v| YamlValue::String(format_timestamp(v)))
}

/// Format a timestamp per invariant I5: UTC ISO-8601, millisecond precision, trailing `Z`.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn front_matter_mapping(issue: &Issue, for_hash: bool) -> serde_yaml::Mapping {
    let mut entries: Vec<(String, YamlValue)> = vec![
        ("assignee".to_string(), opt_str(issue.assignee.as_ref())),
        ("child_order_hints".to_string(), YamlValue::Sequence(
            issue.child_order_hints.iter().map(|s| YamlValue::String(s.clone())).collect(),
        )),
        ("close_reason".to_string(), opt_str(issue.close_reason.as_ref())),
        ("closed_at".to_string(), opt_ts(issue.closed_at)),
        ("created_at".to_string(), YamlValue::String(format_timestamp(issue.created_at))),
        ("created_by".to_string(), YamlValue::String(issue.created_by.clone())),
        (
            "dependencies".to_string(),
            YamlValue::Sequence(issue.dependencies.iter().map(dependency_to_yaml).collect()),
        ),
        ("deferred_until".to_string(), opt_ts(issue.deferred_until)),
        ("due_date".to_string(), opt_ts(issue.due_date)),
        (
            "external_issue_url".to_string(),
            opt_str(issue.external_issue_url.as_ref()),
        ),
        (
            "extensions".to_string(),
            json_map_to_yaml(&issue.extensions),
        ),
        ("id".to_string(), YamlValue::String(issue.id.clone())),
        ("kind".to_string(), YamlValue::String(issue.kind.to_string())),
        (
            "labels".to_string(),
            YamlValue::Sequence(issue.labels.iter().map(|s| YamlValue::String(s.clone())).collect()),
        ),
        ("parent_id".to_string(), opt_str(issue.parent_id.as_ref())),
        ("priority".to_string(), YamlValue::Number(issue.priority.into())),
        ("spec_path".to_string(), opt_str(issue.spec_path.as_ref())),
        ("status".to_string(), YamlValue::String(issue.status.to_string())),
        ("title".to_string(), YamlValue::String(issue.title.clone())),
        ("type".to_string(), YamlValue::String(issue.record_type.clone())),
        ("updated_at".to_string(), YamlValue::String(format_timestamp(issue.updated_at))),
    ];

    if for_hash {
        entries.retain(|(key, value)| {
            !matches!(
                (key.as_str(), value),
                (
                    "assignee" | "close_reason" | "closed_at" | "deferred_until" | "due_date"
                        | "external_issue_url" | "parent_id" | "spec_path",
                    YamlValue::Null
                )
            )
        });
    } else {
        entries.push(("version".to_string(), YamlValue::Number(issue.version.into())));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut mapping = serde_yaml::Mapping::new();
    for (key, value) in entries {
        mapping.insert(YamlValue::String(key), value);
    }
    mapping
}

fn dependency_to_yaml(dep: &Dependency) -> YamlValue {
    let mut m = serde_yaml::Mapping::new();
    m.insert(YamlValue::String("target".to_string()), YamlValue::String(dep.target.clone()));
    m.insert(YamlValue::String("type".to_string()), YamlValue::String(dep.dep_type.clone()));
    YamlValue::Mapping(m)
}

fn json_map_to_yaml(map: &serde_json::Map<String, serde_json::Value>) -> YamlValue {
    serde_yaml::to_value(map).unwrap_or(YamlValue::Null)
}


#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::types::IssueKind;
    use crate::model::Issue;

    fn sample() -> Issue {
        let mut issue = Issue::new("proj", "alice", "First", IssueKind::Task);
        issue.description = "A description.".to_string();
        issue.notes = "Some notes.".to_string();
        issue
    }

    #[test]
    fn round_trips_byte_for_byte() {
        let issue = sample();
        let once = serialize(&issue);
        let parsed = parse(&once).expect("parses");
        let twice = serialize(&parsed);
        assert_eq!(once, twice);
    }

    #[test]
    fn no_blank_line_before_description() {
        let issue = sample();
        let text = serialize(&issue);
        let after_delims = text.split("---\n").nth(2).expect("body section");
        assert!(!after_delims.starts_with('\n'));
    }

    #[test]
    fn rejects_missing_delimiter() {
        assert!(matches!(parse("title: x\n"), Err(ParseError::Format(_))));
    }

    #[test]
    fn splits_notes_case_insensitively() {
        let mut issue = sample();
        issue.notes = String::new();
        let mut text = serialize(&issue);
        text.push_str("\n## NOTES\n\nCase insensitive.\n");
        let parsed = parse(&text).expect("parses");
        assert_eq!(parsed.notes, "Case insensitive.");
    }

    #[test]
    fn canonical_for_hash_sorts_labels_and_omits_version() {
        let mut issue = sample();
        issue.labels = vec!["zeta".to_string(), "alpha".to_string()];
        let hashed = serialize_for_hash(&issue);
        assert!(!hashed.contains("version:"));
        let alpha_pos = hashed.find("alpha").unwrap();
        let zeta_pos = hashed.find("zeta").unwrap();
        assert!(alpha_pos < zeta_pos);
    }

    #[test]
    fn rejects_an_unrecognized_kind_as_schema_not_structured() {
        let text = serialize(&sample()).replace("kind: task", "kind: not_a_kind");
        let err = parse(&text).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Schema(ValidationError::InvalidEnumValue { field: "kind", .. })
        ));
    }

    #[test]
    fn rejects_an_unrecognized_status_as_schema_not_structured() {
        let text = serialize(&sample()).replace("status: open", "status: somehow_open");
        let err = parse(&text).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Schema(ValidationError::InvalidEnumValue { field: "status", .. })
        ));
    }

    #[test]
    fn rejects_a_timestamp_missing_millisecond_precision_as_schema() {
        let issue = sample();
        let bad_created_at = issue.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let text = serialize(&issue).replace(&format_timestamp(issue.created_at), &bad_created_at);
        let err = parse(&text).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Schema(ValidationError::InvalidTimestamp { field: "created_at", .. })
        ));
    }

    #[test]
    fn rejects_a_document_missing_a_required_field() {
        let text = serialize(&sample());
        let without_title = text.lines().filter(|l| !l.starts_with("title:")).collect::<Vec<_>>().join("\n");
        let err = parse(&without_title).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Schema(ValidationError::MissingField { field: "title" })
        ));
    }

    #[test]
    fn is_valid_timestamp_shape_rejects_an_offset_instead_of_z() {
        assert!(!is_valid_timestamp_shape("2024-01-02T03:04:05.123+00:00"));
        assert!(is_valid_timestamp_shape("2024-01-02T03:04:05.123Z"));
    }
}
