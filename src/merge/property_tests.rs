//! Property tests for the merge engine's algebraic guarantees (§8
//! quantified invariants): no-op on identical inputs, commutativity and
//! idempotence on conflict-free inputs.
//!
//! The idempotence check compares the stabilized label set rather than
//! whole-struct equality: `version`/`updated_at` advance on every call by
//! design (§4.5), so only content convergence is idempotent, not the
//! monotonic counters layered on top of it.
//!
//! Grounded on the corpus's property-test shape for merge determinism
//! (`src/merge/determinism_tests.rs`): proptest-generated inputs, gated
//! behind the `proptests` feature so the default `cargo test` run stays fast.

#![allow(clippy::all, clippy::pedantic, clippy::nursery, clippy::unwrap_used)]

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use crate::model::IssueKind;
use crate::model::Issue;

use super::merge_issues;

fn label() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,6}"
}

fn offset_secs() -> impl Strategy<Value = i64> {
    1i64..10_000
}

prop_compose! {
    fn base_issue()(title in "[a-zA-Z0-9 ]{1,20}", base_labels in prop::collection::vec(label(), 0..3)) -> Issue {
        let mut issue = Issue::new("proj", "alice", title, IssueKind::Task);
        issue.labels = base_labels;
        issue
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn identical_inputs_are_always_a_no_op(base in base_issue(), now_offset in offset_secs()) {
        let now = base.updated_at + chrono::Duration::seconds(now_offset);
        let result = merge_issues(Some(&base), &base, &base, now);
        prop_assert_eq!(result.merged.version, base.version);
        prop_assert_eq!(result.merged.updated_at, base.updated_at);
        prop_assert!(result.conflicts.is_empty());
    }

    #[test]
    fn no_base_identical_records_never_conflict(base in base_issue(), now_offset in offset_secs()) {
        let now = base.updated_at + chrono::Duration::seconds(now_offset);
        let result = merge_issues(None, &base, &base, now);
        prop_assert!(result.conflicts.is_empty());
        prop_assert_eq!(result.merged, base);
    }

    #[test]
    fn disjoint_label_merges_are_commutative(
        base in base_issue(),
        extra_a in label(),
        extra_b in label(),
        local_offset in offset_secs(),
        remote_offset in offset_secs(),
    ) {
        prop_assume!(extra_a != extra_b);
        prop_assume!(!base.labels.contains(&extra_a) && !base.labels.contains(&extra_b));

        let mut local = base.clone();
        local.labels.push(extra_a);
        local.updated_at = base.updated_at + chrono::Duration::seconds(local_offset);

        let mut remote = base.clone();
        remote.labels.push(extra_b);
        remote.updated_at = base.updated_at + chrono::Duration::seconds(remote_offset);

        let now = Utc::now().max(local.updated_at).max(remote.updated_at);
        let forward = merge_issues(Some(&base), &local, &remote, now);
        let backward = merge_issues(Some(&base), &remote, &local, now);

        let mut forward_labels = forward.merged.labels.clone();
        let mut backward_labels = backward.merged.labels.clone();
        forward_labels.sort();
        backward_labels.sort();
        prop_assert_eq!(forward_labels, backward_labels);
        prop_assert!(forward.conflicts.is_empty());
        prop_assert!(backward.conflicts.is_empty());
    }

    #[test]
    fn disjoint_label_merge_is_idempotent(
        base in base_issue(),
        extra_a in label(),
        extra_b in label(),
        local_offset in offset_secs(),
        remote_offset in offset_secs(),
    ) {
        prop_assume!(extra_a != extra_b);
        prop_assume!(!base.labels.contains(&extra_a) && !base.labels.contains(&extra_b));

        let mut local = base.clone();
        local.labels.push(extra_a);
        local.updated_at = base.updated_at + chrono::Duration::seconds(local_offset);

        let mut remote = base.clone();
        remote.labels.push(extra_b);
        remote.updated_at = base.updated_at + chrono::Duration::seconds(remote_offset);

        let now: DateTime<Utc> = Utc::now().max(local.updated_at).max(remote.updated_at);
        let once = merge_issues(Some(&base), &local, &remote, now);
        let twice = merge_issues(Some(&base), &once.merged, &remote, now);

        let mut once_labels = once.merged.labels.clone();
        let mut twice_labels = twice.merged.labels.clone();
        once_labels.sort();
        twice_labels.sort();
        prop_assert_eq!(once_labels, twice_labels);
    }
}
