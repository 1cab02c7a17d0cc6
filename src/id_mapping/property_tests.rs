//! Property tests for short-id allocation and reconciliation (§8 quantified
//! invariants): allocation never collides, and reconciling against a
//! history preserves every id that history already had a short id for.
//!
//! Grounded on the corpus's property-test shape for merge determinism
//! (`src/merge/determinism_tests.rs`): proptest-generated inputs, gated
//! behind the `proptests` feature so the default `cargo test` run stays fast.

#![allow(clippy::all, clippy::pedantic, clippy::nursery, clippy::unwrap_used)]

use proptest::prelude::*;

use super::IdMapping;

fn ulid_like() -> impl Strategy<Value = String> {
    "[0-9A-Z]{26}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn allocation_never_collides(count in 1usize..80) {
        let mut mapping = IdMapping::default();
        for i in 0..count {
            let outcome = mapping.reconcile(&[format!("ulid-{i}")], &IdMapping::default());
            prop_assert_eq!(outcome.created.len(), 1);
        }
        prop_assert_eq!(mapping.len(), count);
    }

    #[test]
    fn reconcile_preserves_every_history_entry_it_can_reuse(ulids in prop::collection::vec(ulid_like(), 1..20)) {
        let mut unique: Vec<String> = Vec::new();
        for u in ulids {
            if !unique.contains(&u) {
                unique.push(u);
            }
        }
        prop_assume!(!unique.is_empty());

        let mut history = IdMapping::default();
        let outcome = history.reconcile(&unique, &IdMapping::default());
        prop_assert_eq!(outcome.created.len(), unique.len());

        let mut fresh = IdMapping::default();
        fresh.reconcile(&unique, &history);

        for ulid in &unique {
            prop_assert_eq!(fresh.short_id_for(ulid), history.short_id_for(ulid));
        }
    }
}
