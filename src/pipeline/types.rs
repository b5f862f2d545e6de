//! Shared types for the triage pipeline.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::classifier::Classification;

/// Label attached to issues a human should double-check.
pub const NEEDS_REVIEW_LABEL: &str = "needs-review";

// ── Run mode ────────────────────────────────────────────────────────

/// Whether decisions are written back to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Decide and report, never mutate.
    #[default]
    DryRun,
    Execute,
}

impl RunMode {
    pub fn from_execute_flag(execute: bool) -> Self {
        if execute { Self::Execute } else { Self::DryRun }
    }

    pub fn is_execute(self) -> bool {
        self == Self::Execute
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Execute => "execute",
        }
    }
}

// ── Decision ────────────────────────────────────────────────────────

/// Why an issue gets the needs-review label.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewReason {
    /// Classifier confidence strictly below the threshold.
    LowConfidence { confidence: f32, threshold: f32 },
    /// Classified bucket has no entry in the bucket table.
    UnknownBucket { bucket: String },
}

impl ReviewReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::LowConfidence { .. } => "low_confidence",
            Self::UnknownBucket { .. } => "unknown_bucket",
        }
    }
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below threshold {threshold:.2}"),
            Self::UnknownBucket { bucket } => {
                write!(f, "bucket \"{bucket}\" is not in the bucket table")
            }
        }
    }
}

/// What the engine decided for one issue.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub identifier: String,
    /// Final bucket label (after overrides).
    pub bucket: String,
    /// Resolved owner. `None` when the bucket is unknown.
    pub owner: Option<String>,
    /// Name of the override rule that fired.
    pub override_rule: Option<String>,
    pub review_reasons: Vec<ReviewReason>,
    pub classification: Classification,
    /// Audit comment posted on the issue.
    pub comment: String,
}

impl Decision {
    pub fn needs_review(&self) -> bool {
        !self.review_reasons.is_empty()
    }

    pub fn has_reason(&self, label: &str) -> bool {
        self.review_reasons.iter().any(|r| r.label() == label)
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Why an issue was left alone.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Someone already owns the issue.
    Assigned { assignee: String },
    /// An earlier run flagged it with no owner; a human has not picked it up yet.
    AwaitingReview,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assigned { assignee } => write!(f, "assigned to {assignee}"),
            Self::AwaitingReview => write!(f, "already flagged {NEEDS_REVIEW_LABEL}, no owner"),
        }
    }
}

/// Per-issue result of a run.
#[derive(Debug, Clone)]
pub enum IssueOutcome {
    /// Nothing was classified or written.
    Skipped {
        identifier: String,
        reason: SkipReason,
    },
    /// Decision written back (execute mode).
    Applied(Decision),
    /// Decision computed but not written (dry run).
    Previewed(Decision),
    /// Classification or write-back failed.
    Failed { identifier: String, error: String },
}

impl IssueOutcome {
    pub fn identifier(&self) -> &str {
        match self {
            Self::Skipped { identifier, .. } | Self::Failed { identifier, .. } => identifier,
            Self::Applied(d) | Self::Previewed(d) => &d.identifier,
        }
    }

    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Applied(d) | Self::Previewed(d) => Some(d),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Applied(_) => "applied",
            Self::Previewed(_) => "previewed",
            Self::Failed { .. } => "failed",
        }
    }
}

// ── Run summary ─────────────────────────────────────────────────────

/// Counters for one run. `flagged` and `assigned` are subsets of `processed`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Issues fetched.
    pub total: usize,
    /// Issues that reached a decision (applied or previewed).
    pub processed: usize,
    pub skipped: usize,
    /// Processed issues carrying the needs-review flag.
    pub flagged: usize,
    pub failed: usize,
    /// Processed issues with a resolved owner.
    pub assigned: usize,
}

impl RunSummary {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            started_at: Utc::now(),
            finished_at: None,
            total: 0,
            processed: 0,
            skipped: 0,
            flagged: 0,
            failed: 0,
            assigned: 0,
        }
    }

    pub fn record(&mut self, outcome: &IssueOutcome) {
        self.total += 1;
        match outcome {
            IssueOutcome::Skipped { .. } => self.skipped += 1,
            IssueOutcome::Failed { .. } => self.failed += 1,
            IssueOutcome::Applied(decision) | IssueOutcome::Previewed(decision) => {
                self.processed += 1;
                if decision.needs_review() {
                    self.flagged += 1;
                }
                if decision.owner.is_some() {
                    self.assigned += 1;
                }
            }
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn from_outcomes<'a>(
        mode: RunMode,
        outcomes: impl IntoIterator<Item = &'a IssueOutcome>,
    ) -> Self {
        let mut summary = Self::new(mode);
        for outcome in outcomes {
            summary.record(outcome);
        }
        summary.finish();
        summary
    }
}

/// Everything a run produced, in fetch order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub outcomes: Vec<IssueOutcome>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let assigned_label = if self.mode.is_execute() {
            "assigned"
        } else {
            "would assign"
        };
        write!(
            f,
            "{} issues [{}]: processed {}, skipped {}, flagged {}, failed {} ({} {})",
            self.total,
            self.mode.label(),
            self.processed,
            self.skipped,
            self.flagged,
            self.failed,
            assigned_label,
            self.assigned,
        )
    }
}
