//! The issue record schema, merge-class metadata, and validation.

pub mod issue;
pub mod types;

pub use issue::Issue;
pub use types::{Dependency, IssueKind, Status, ValidationError};
