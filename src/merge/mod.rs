//! Field-level three-way merge engine (§4.5).
//!
//! Grounded on the *shape* of a file-content merge engine elsewhere in this
//! codebase's lineage — a typed result carrying both the merged value and an
//! ordered list of conflict records, with exhaustive per-arity tests — but
//! not its domain: this engine merges typed issue *fields*, not diff3 text
//! hunks.

mod engine;

#[cfg(all(test, feature = "proptests"))]
mod property_tests;

pub use engine::{merge_for_workspace, merge_issues, synthesize_base, MergeOutcome};
