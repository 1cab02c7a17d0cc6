use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::attic::{AtticContext, AtticEntry, Source};
use crate::model::types::Dependency;
use crate::model::Issue;
use crate::parser::serialize_for_hash;

/// Output of a merge: the merged record plus any conflicts it produced.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The merged issue.
    pub merged: Issue,
    /// One entry per field whose loser was discarded.
    pub conflicts: Vec<AtticEntry>,
}

fn content_hash<T: Serialize>(value: &T) -> Vec<u8> {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    Sha256::digest(bytes).to_vec()
}

const fn opposite(source: Source) -> Source {
    match source {
        Source::Local => Source::Remote,
        Source::Remote => Source::Local,
    }
}

/// Synthesize a base for a two-record merge with no common ancestor.
///
/// Used when `source.updated_at == target.updated_at` and neither can be
/// called "older" (§4.5 tie-breaking details, used by workspace save/import
/// §4.8).
#[must_use]
pub fn synthesize_base(from: &Issue) -> Issue {
    let mut base = from.clone();
    base.version = 0;
    base.updated_at = DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default();
    base
}

struct FieldContext<'a> {
    local: &'a Issue,
    remote: &'a Issue,
    now: DateTime<Utc>,
}

/// Resolve one LWW-class field. `base`/`local`/`remote` are the field's
/// value on each side; `ctx` carries the enclosing records for
/// `updated_at`/`version` comparisons and conflict context.
fn lww_field<T>(field: &'static str, base: &T, local: &T, remote: &T, ctx: &FieldContext) -> (T, Option<AtticEntry>)
where
    T: Clone + PartialEq + Serialize,
{
    let local_changed = local != base;
    let remote_changed = remote != base;

    match (local_changed, remote_changed) {
        (false, false) => (base.clone(), None),
        (false, true) => (remote.clone(), None),
        (true, false) => (local.clone(), None),
        (true, true) => {
            let (winner, winner_source, loser) = match ctx.local.updated_at.cmp(&ctx.remote.updated_at) {
                std::cmp::Ordering::Greater => (local.clone(), Source::Local, remote.clone()),
                std::cmp::Ordering::Less => (remote.clone(), Source::Remote, local.clone()),
                std::cmp::Ordering::Equal => {
                    let local_hash = content_hash(local);
                    let remote_hash = content_hash(remote);
                    if local_hash >= remote_hash {
                        (local.clone(), Source::Local, remote.clone())
                    } else {
                        (remote.clone(), Source::Remote, local.clone())
                    }
                }
            };
            let entry = AtticEntry {
                entity_id: ctx.local.id.clone(),
                timestamp: ctx.now,
                field: field.to_string(),
                lost_value: serde_yaml::to_value(&loser).unwrap_or(serde_yaml::Value::Null),
                winner_source,
                loser_source: opposite(winner_source),
                context: AtticContext {
                    local_version: ctx.local.version,
                    remote_version: ctx.remote.version,
                    local_updated_at: ctx.local.updated_at,
                    remote_updated_at: ctx.remote.updated_at,
                },
            };
            (winner, Some(entry))
        }
    }
}

fn union_strings(base: &[String], local: &[String], remote: &[String]) -> Vec<String> {
    if local == remote {
        return local.to_vec();
    }
    if local == base {
        return remote.to_vec();
    }
    if remote == base {
        return local.to_vec();
    }
    let mut merged = local.to_vec();
    for item in remote {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

fn union_dependencies(base: &[Dependency], local: &[Dependency], remote: &[Dependency]) -> Vec<Dependency> {
    if local == remote {
        return local.to_vec();
    }
    if local == base {
        return remote.to_vec();
    }
    if remote == base {
        return local.to_vec();
    }
    let mut merged = local.to_vec();
    for item in remote {
        if !merged.iter().any(|d| d.target == item.target) {
            merged.push(item.clone());
        }
    }
    merged
}

/// The field-level three-way merge (§4.5).
///
/// When `base` is `None`, falls back to the independent-creation rule
/// (older `created_at` wins; a single `whole_issue` attic entry records
/// the loser unless the two records are byte-identical).
#[must_use]
pub fn merge_issues(base: Option<&Issue>, local: &Issue, remote: &Issue, now: DateTime<Utc>) -> MergeOutcome {
    let Some(base) = base else {
        return merge_no_base(local, remote, now);
    };

    if local == remote {
        return MergeOutcome {
            merged: local.clone(),
            conflicts: Vec::new(),
        };
    }

    let ctx = FieldContext { local, remote, now };
    let mut conflicts = Vec::new();
    let mut merged = base.clone();

    macro_rules! lww {
        ($field:ident, $name:literal) => {{
            let (value, conflict) = lww_field($name, &base.$field, &local.$field, &remote.$field, &ctx);
            merged.$field = value;
            if let Some(c) = conflict {
                conflicts.push(c);
            }
        }};
    }

    lww!(kind, "kind");
    lww!(title, "title");
    lww!(description, "description");
    lww!(notes, "notes");
    lww!(status, "status");
    lww!(priority, "priority");
    lww!(assignee, "assignee");
    lww!(parent_id, "parent_id");
    lww!(spec_path, "spec_path");
    lww!(close_reason, "close_reason");
    lww!(closed_at, "closed_at");
    lww!(due_date, "due_date");
    lww!(deferred_until, "deferred_until");
    lww!(child_order_hints, "child_order_hints");
    lww!(extensions, "extensions");
    lww!(external_issue_url, "external_issue_url");

    merged.labels = union_strings(&base.labels, &local.labels, &remote.labels);
    merged.dependencies = union_dependencies(&base.dependencies, &local.dependencies, &remote.dependencies);

    // Immutable fields: always keep base, never conflict (I1/I2 corruption is
    // silently suppressed here by design of §4.5, not re-validated).
    merged.record_type.clone_from(&base.record_type);
    merged.id.clone_from(&base.id);
    merged.created_at = base.created_at;
    merged.created_by.clone_from(&base.created_by);

    merged.version = local.version.max(remote.version) + 1;
    merged.updated_at = now;

    MergeOutcome { merged, conflicts }
}

fn merge_no_base(local: &Issue, remote: &Issue, now: DateTime<Utc>) -> MergeOutcome {
    let identical = serialize_for_hash(local) == serialize_for_hash(remote);
    let (winner, winner_source, loser) = if local.created_at <= remote.created_at {
        (local.clone(), Source::Local, remote.clone())
    } else {
        (remote.clone(), Source::Remote, local.clone())
    };

    let mut conflicts = Vec::new();
    if !identical {
        conflicts.push(AtticEntry {
            entity_id: winner.id.clone(),
            timestamp: now,
            field: "whole_issue".to_string(),
            lost_value: serde_yaml::to_value(&loser).unwrap_or(serde_yaml::Value::Null),
            winner_source,
            loser_source: opposite(winner_source),
            context: AtticContext {
                local_version: local.version,
                remote_version: remote.version,
                local_updated_at: local.updated_at,
                remote_updated_at: remote.updated_at,
            },
        });
    }

    MergeOutcome { merged: winner, conflicts }
}

/// Merge `source` into `target` for workspace save/import (§4.8), which has
/// no common-ancestor base: the older record (by `updated_at`) becomes the
/// base; on an exact tie, [`synthesize_base`] breaks it.
#[must_use]
pub fn merge_for_workspace(source: &Issue, target: &Issue, now: DateTime<Utc>) -> MergeOutcome {
    if source.updated_at == target.updated_at {
        let base = synthesize_base(target);
        return merge_issues(Some(&base), target, source, now);
    }
    let older = if source.updated_at < target.updated_at { source } else { target };
    merge_issues(Some(older), target, source, now)
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::IssueKind;

    fn issue_at(title: &str, updated_at: DateTime<Utc>, version: u64) -> Issue {
        let mut issue = Issue::new("proj", "alice", title, IssueKind::Task);
        issue.updated_at = updated_at;
        issue.version = version;
        issue
    }

    #[test]
    fn identical_inputs_are_a_true_noop() {
        let base = issue_at("x", Utc::now(), 3);
        let result = merge_issues(Some(&base), &base, &base, Utc::now());
        assert_eq!(result.merged, base);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn only_remote_changed_takes_remote_without_conflict() {
        let t0 = Utc::now();
        let base = issue_at("x", t0, 3);
        let mut remote = base.clone();
        remote.title = "y".to_string();
        remote.updated_at = t0 + chrono::Duration::seconds(1);

        let result = merge_issues(Some(&base), &base, &remote, Utc::now());
        assert_eq!(result.merged.title, "y");
        assert!(result.conflicts.is_empty());
        assert_eq!(result.merged.version, base.version.max(remote.version) + 1);
    }

    #[test]
    fn both_changed_lww_emits_one_conflict_for_the_loser() {
        let t0 = Utc::now();
        let base = issue_at("x", t0, 3);
        let mut local = base.clone();
        local.title = "A".to_string();
        local.updated_at = t0 + chrono::Duration::seconds(10);
        let mut remote = base.clone();
        remote.title = "B".to_string();
        remote.updated_at = t0 + chrono::Duration::seconds(11);

        let result = merge_issues(Some(&base), &local, &remote, Utc::now());
        assert_eq!(result.merged.title, "B");
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].field, "title");
        assert_eq!(result.conflicts[0].winner_source, Source::Remote);
    }

    #[test]
    fn disjoint_label_additions_union_with_zero_conflicts() {
        let t0 = Utc::now();
        let mut base = issue_at("x", t0, 3);
        base.labels = vec!["p1".to_string()];
        let mut local = base.clone();
        local.labels.push("bug".to_string());
        local.updated_at = t0 + chrono::Duration::seconds(1);
        let mut remote = base.clone();
        remote.labels.push("ui".to_string());
        remote.updated_at = t0 + chrono::Duration::seconds(1);

        let result = merge_issues(Some(&base), &local, &remote, Utc::now());
        assert!(result.conflicts.is_empty());
        assert!(result.merged.labels.contains(&"bug".to_string()));
        assert!(result.merged.labels.contains(&"ui".to_string()));
        assert_eq!(result.merged.labels.len(), 3);
    }

    #[test]
    fn merge_is_commutative_on_conflict_free_inputs() {
        let t0 = Utc::now();
        let mut base = issue_at("x", t0, 3);
        base.labels = vec!["p1".to_string()];
        let mut local = base.clone();
        local.labels.push("bug".to_string());
        local.updated_at = t0 + chrono::Duration::seconds(1);
        let mut remote = base.clone();
        remote.labels.push("ui".to_string());
        remote.updated_at = t0 + chrono::Duration::seconds(1);

        let now = Utc::now();
        let forward = merge_issues(Some(&base), &local, &remote, now);
        let backward = merge_issues(Some(&base), &remote, &local, now);
        let mut forward_labels = forward.merged.labels.clone();
        let mut backward_labels = backward.merged.labels.clone();
        forward_labels.sort();
        backward_labels.sort();
        assert_eq!(forward_labels, backward_labels);
    }

    #[test]
    fn no_base_prefers_older_created_at() {
        let t0 = Utc::now();
        let mut a = issue_at("a", t0, 1);
        a.created_at = t0;
        let mut b = issue_at("b", t0, 1);
        b.created_at = t0 + chrono::Duration::seconds(5);

        let result = merge_issues(None, &a, &b, Utc::now());
        assert_eq!(result.merged.title, "a");
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].field, "whole_issue");
    }

    #[test]
    fn no_base_identical_records_have_no_conflict() {
        let issue = issue_at("x", Utc::now(), 1);
        let result = merge_issues(None, &issue, &issue, Utc::now());
        assert!(result.conflicts.is_empty());
    }
}
