//! Triage pipeline.
//!
//! Every unassigned triage issue flows through:
//! 1. `Classifier::classify()` for bucket, confidence and rationale
//! 2. `OverrideRules::evaluate()` then the bucket table for the owner
//! 3. `decide()` for the needs-review flag and audit comment
//! 4. Write-back through `IssueTracker`, in execute mode only
//!
//! **Dry run is the default.** Nothing is written without `RunMode::Execute`.

pub mod processor;
pub mod rules;
pub mod types;

pub use processor::{TriageEngine, decide};
pub use rules::{OverrideCondition, OverrideRule, OverrideRules};
pub use types::{
    Decision, IssueOutcome, NEEDS_REVIEW_LABEL, ReviewReason, RunMode, RunReport, RunSummary,
    SkipReason,
};
