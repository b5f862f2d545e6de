//! Triage engine: classifies unassigned triage issues and routes them to owners.
//!
//! Flow per issue:
//! 1. Skip rule: already-assigned issues are left alone
//! 2. Classifier → bucket, confidence, rationale
//! 3. Override rules → forced owner, else bucket table lookup
//! 4. Confidence policy → needs-review flag
//! 5. Write-back (execute mode only): assignee and label in one update,
//!    then the audit comment
//!
//! Per-issue failures are logged and counted. Only fetch failures abort a run.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::buckets::{BucketEntry, BucketTable};
use crate::classifier::{Classification, Classifier};
use crate::error::{BucketLookupError, FetchError, WriteBackError, WriteBackStep};
use crate::pipeline::rules::{OverrideRule, OverrideRules};
use crate::pipeline::types::{
    Decision, IssueOutcome, NEEDS_REVIEW_LABEL, ReviewReason, RunMode, RunReport, RunSummary,
    SkipReason,
};
use crate::tracker::{Issue, IssueTracker};

/// Triage engine. Holds the run-wide read-only state and the two
/// external collaborators.
pub struct TriageEngine {
    tracker: Arc<dyn IssueTracker>,
    classifier: Arc<dyn Classifier>,
    buckets: Arc<BucketTable>,
    rules: OverrideRules,
    threshold: f32,
    mode: RunMode,
}

impl TriageEngine {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        classifier: Arc<dyn Classifier>,
        buckets: Arc<BucketTable>,
        rules: OverrideRules,
        threshold: f32,
        mode: RunMode,
    ) -> Self {
        Self {
            tracker,
            classifier,
            buckets,
            rules,
            threshold,
            mode,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Process every triage issue of the team, in tracker order.
    pub async fn run_batch(&self, team_key: &str) -> Result<RunReport, FetchError> {
        let issues = self
            .tracker
            .list_triage_issues(team_key)
            .await
            .map_err(|source| FetchError::List {
                team: team_key.to_string(),
                source,
            })?;

        info!(
            team = team_key,
            count = issues.len(),
            mode = self.mode.label(),
            "Processing triage batch"
        );

        Ok(self.process_all(&issues).await)
    }

    /// Process exactly one issue by key.
    pub async fn run_single(&self, identifier: &str) -> Result<RunReport, FetchError> {
        let issue = self
            .tracker
            .get_issue(identifier)
            .await
            .map_err(|source| FetchError::Issue {
                identifier: identifier.to_string(),
                source,
            })?;

        info!(
            issue = %issue.identifier,
            mode = self.mode.label(),
            "Processing single issue"
        );

        Ok(self.process_all(std::slice::from_ref(&issue)).await)
    }

    async fn process_all(&self, issues: &[Issue]) -> RunReport {
        let mut summary = RunSummary::new(self.mode);
        let mut outcomes = Vec::with_capacity(issues.len());

        for issue in issues {
            let outcome = self.process_issue(issue).await;
            summary.record(&outcome);
            outcomes.push(outcome);
        }
        summary.finish();

        info!(
            total = summary.total,
            processed = summary.processed,
            skipped = summary.skipped,
            flagged = summary.flagged,
            failed = summary.failed,
            assigned = summary.assigned,
            "Triage run complete"
        );

        RunReport { summary, outcomes }
    }

    /// Run the full procedure for one issue. Never fails: errors become
    /// `IssueOutcome::Failed`.
    pub async fn process_issue(&self, issue: &Issue) -> IssueOutcome {
        if let Some(assignee) = &issue.assignee {
            debug!(
                issue = %issue.identifier,
                assignee = %assignee.name,
                "Already assigned, skipping"
            );
            return IssueOutcome::Skipped {
                identifier: issue.identifier.clone(),
                reason: SkipReason::Assigned {
                    assignee: assignee.name.clone(),
                },
            };
        }

        let classification = match self.classifier.classify(issue).await {
            Ok(c) => c,
            Err(e) => {
                error!(issue = %issue.identifier, error = %e, "Classification failed");
                return IssueOutcome::Failed {
                    identifier: issue.identifier.clone(),
                    error: e.to_string(),
                };
            }
        };

        let decision = decide(
            issue,
            classification,
            &self.buckets,
            &self.rules,
            self.threshold,
        );

        // Flagged with no owner on an earlier run; the comment is already there.
        if decision.owner.is_none() && issue.has_label(NEEDS_REVIEW_LABEL) {
            info!(
                issue = %issue.identifier,
                bucket = %decision.bucket,
                "Already flagged for review with no owner, skipping"
            );
            return IssueOutcome::Skipped {
                identifier: issue.identifier.clone(),
                reason: SkipReason::AwaitingReview,
            };
        }

        log_decision(&decision, self.mode);

        if !self.mode.is_execute() {
            return IssueOutcome::Previewed(decision);
        }

        match self.write_back(issue, &decision).await {
            Ok(()) => IssueOutcome::Applied(decision),
            Err(e) => {
                match (e.step, decision.owner.is_some()) {
                    (WriteBackStep::AddComment, true) => error!(
                        issue = %issue.identifier,
                        step = %e.step,
                        error = %e.source,
                        "Write-back failed after assignment; audit comment is missing"
                    ),
                    _ => error!(
                        issue = %issue.identifier,
                        step = %e.step,
                        error = %e.source,
                        "Write-back failed; issue is retried on the next run"
                    ),
                }
                IssueOutcome::Failed {
                    identifier: issue.identifier.clone(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Apply a decision. Stops at the first failing call.
    ///
    /// With an owner, assignee and review label land in one tracker update,
    /// then the audit comment follows. Without an owner, the comment goes
    /// first and the label last, so a labelled issue always has its comment.
    async fn write_back(&self, issue: &Issue, decision: &Decision) -> Result<(), WriteBackError> {
        let failed = |step: WriteBackStep| {
            let identifier = issue.identifier.clone();
            move |source| WriteBackError {
                identifier,
                step,
                source,
            }
        };

        let labels: &[&str] = if decision.needs_review() {
            &[NEEDS_REVIEW_LABEL]
        } else {
            &[]
        };

        match &decision.owner {
            Some(owner) => {
                self.tracker
                    .set_assignee(issue, owner, labels)
                    .await
                    .map_err(failed(WriteBackStep::SetAssignee))?;
                self.tracker
                    .add_comment(issue, &decision.comment)
                    .await
                    .map_err(failed(WriteBackStep::AddComment))?;
            }
            None => {
                self.tracker
                    .add_comment(issue, &decision.comment)
                    .await
                    .map_err(failed(WriteBackStep::AddComment))?;
                for label in labels {
                    self.tracker
                        .add_label(issue, label)
                        .await
                        .map_err(failed(WriteBackStep::AddLabel))?;
                }
            }
        }

        info!(
            issue = %issue.identifier,
            owner = decision.owner.as_deref().unwrap_or("none"),
            needs_review = decision.needs_review(),
            "Decision written back"
        );
        Ok(())
    }
}

// ── Decision ────────────────────────────────────────────────────────

/// Decide bucket, owner and review flag for a classified issue.
///
/// Overrides are evaluated first. Without an override the bucket must be
/// in the table; an unknown bucket yields no owner and a review flag.
/// Confidence strictly below `threshold` adds a review flag but keeps the
/// owner.
pub fn decide(
    issue: &Issue,
    classification: Classification,
    buckets: &BucketTable,
    rules: &OverrideRules,
    threshold: f32,
) -> Decision {
    let mut review_reasons = Vec::new();

    let rule = rules.evaluate(issue, &classification.bucket);
    let (bucket, owner) = match rule {
        Some(rule) => (
            rule.bucket
                .clone()
                .unwrap_or_else(|| classification.bucket.clone()),
            Some(rule.owner.clone()),
        ),
        None => match lookup_owner(buckets, &classification.bucket) {
            Ok(entry) => (entry.name.clone(), Some(entry.owner.clone())),
            Err(e) => {
                review_reasons.push(ReviewReason::UnknownBucket { bucket: e.bucket });
                (classification.bucket.clone(), None)
            }
        },
    };

    if classification.confidence < threshold {
        review_reasons.push(ReviewReason::LowConfidence {
            confidence: classification.confidence,
            threshold,
        });
    }

    let comment = build_comment(
        &bucket,
        owner.as_deref(),
        &classification,
        rule,
        &review_reasons,
    );

    Decision {
        identifier: issue.identifier.clone(),
        bucket,
        owner,
        override_rule: rule.map(|r| r.name.clone()),
        review_reasons,
        classification,
        comment,
    }
}

fn lookup_owner<'a>(
    buckets: &'a BucketTable,
    bucket: &str,
) -> Result<&'a BucketEntry, BucketLookupError> {
    buckets.lookup(bucket).ok_or_else(|| BucketLookupError {
        bucket: bucket.trim().to_string(),
    })
}

fn log_decision(decision: &Decision, mode: RunMode) {
    for reason in &decision.review_reasons {
        match reason {
            ReviewReason::UnknownBucket { bucket } => warn!(
                issue = %decision.identifier,
                bucket = %bucket,
                error = %BucketLookupError { bucket: bucket.clone() },
                "Classified bucket missing from bucket table, flagging for review"
            ),
            ReviewReason::LowConfidence {
                confidence,
                threshold,
            } => warn!(
                issue = %decision.identifier,
                confidence = confidence,
                threshold = threshold,
                "Low classifier confidence, flagging for review"
            ),
        }
    }

    info!(
        issue = %decision.identifier,
        mode = mode.label(),
        bucket = %decision.bucket,
        owner = decision.owner.as_deref().unwrap_or("none"),
        confidence = decision.classification.confidence,
        override_rule = decision.override_rule.as_deref().unwrap_or("none"),
        needs_review = decision.needs_review(),
        "Decision"
    );
}

// ── Audit comment ───────────────────────────────────────────────────

/// Markdown audit comment posted on the issue.
fn build_comment(
    bucket: &str,
    owner: Option<&str>,
    classification: &Classification,
    rule: Option<&OverrideRule>,
    review_reasons: &[ReviewReason],
) -> String {
    let mut comment = String::with_capacity(512);
    comment.push_str("**Automated triage**\n\n");
    comment.push_str(&format!("- **Bucket:** {bucket}\n"));
    match owner {
        Some(owner) => comment.push_str(&format!("- **Owner:** {owner}\n")),
        None => comment.push_str("- **Owner:** none (bucket not in the bucket table)\n"),
    }
    comment.push_str(&format!(
        "- **Confidence:** {:.2}\n",
        classification.confidence
    ));
    if let Some(alternative) = &classification.alternative_bucket {
        comment.push_str(&format!("- **Alternative bucket:** {alternative}\n"));
    }
    if let Some(rule) = rule {
        comment.push_str(&format!(
            "- **Override:** {} (classified as {})\n",
            rule.name, classification.bucket
        ));
    }
    for reason in review_reasons {
        comment.push_str(&format!("- **Needs review:** {reason}\n"));
    }

    let rationale = classification.rationale.trim();
    if rationale.is_empty() {
        comment.push_str("\n**Rationale:** (none given)");
    } else {
        comment.push_str(&format!("\n**Rationale:** {rationale}"));
    }
    comment
}
