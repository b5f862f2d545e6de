//! Issue tracker boundary.
//!
//! The engine only sees [`IssueTracker`]; [`LinearClient`] is the production
//! implementation. Tests substitute in-memory fakes.

pub mod linear;

pub use linear::LinearClient;

use async_trait::async_trait;

use crate::error::TrackerError;

/// Workflow state of an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueState {
    pub name: String,
    /// State category, e.g. "triage", "backlog", "started".
    pub kind: String,
}

/// Current assignee of an issue.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Assignee {
    pub id: String,
    pub name: String,
}

/// A label attached to an issue.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct IssueLabel {
    pub id: String,
    pub name: String,
}

/// An issue as read from the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Tracker-internal id used for mutations.
    pub id: String,
    /// Team-scoped key, e.g. "PROF-23".
    pub identifier: String,
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    /// Tracker-internal id of the owning team.
    pub team_id: String,
    pub state: Option<IssueState>,
    pub assignee: Option<Assignee>,
    pub labels: Vec<IssueLabel>,
}

impl Issue {
    /// Minimal unassigned issue in triage. The identifier doubles as id.
    pub fn new(identifier: impl Into<String>, title: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            id: identifier.clone(),
            identifier,
            title: title.into(),
            description: None,
            url: None,
            team_id: String::new(),
            state: Some(IssueState {
                name: "Triage".into(),
                kind: "triage".into(),
            }),
            assignee: None,
            labels: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_assignee(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.assignee = Some(Assignee {
            id: format!("user-{}", name.to_lowercase().replace(' ', "-")),
            name,
        });
        self
    }

    pub fn with_label(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.labels.push(IssueLabel {
            id: format!("label-{}", name.to_lowercase()),
            name,
        });
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.assignee.is_some()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name.eq_ignore_ascii_case(name))
    }

    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }
}

/// Read and write operations the triage engine needs from the tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// All issues in triage state for the team, in tracker order.
    async fn list_triage_issues(&self, team_key: &str) -> Result<Vec<Issue>, TrackerError>;

    /// One issue by its team-scoped key.
    async fn get_issue(&self, identifier: &str) -> Result<Issue, TrackerError>;

    /// Assign the issue to the team member known as `owner` and attach
    /// `labels` in the same update, so neither lands without the other.
    async fn set_assignee(
        &self,
        issue: &Issue,
        owner: &str,
        labels: &[&str],
    ) -> Result<(), TrackerError>;

    /// Add a markdown comment.
    async fn add_comment(&self, issue: &Issue, body: &str) -> Result<(), TrackerError>;

    /// Attach a label by name, creating it for the team if needed.
    async fn add_label(&self, issue: &Issue, label: &str) -> Result<(), TrackerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_issue_is_unassigned_triage() {
        let issue = Issue::new("PROF-1", "Export fails");
        assert!(!issue.is_assigned());
        assert_eq!(issue.state.as_ref().unwrap().kind, "triage");
        assert_eq!(issue.id, "PROF-1");
    }

    #[test]
    fn label_checks_ignore_case() {
        let issue = Issue::new("PROF-2", "x").with_label("Needs-Review");
        assert!(issue.has_label("needs-review"));
        assert_eq!(issue.label_names(), vec!["Needs-Review"]);
    }

    #[test]
    fn with_assignee_marks_assigned() {
        let issue = Issue::new("PROF-3", "x").with_assignee("Bob");
        assert!(issue.is_assigned());
        assert_eq!(issue.assignee.unwrap().name, "Bob");
    }
}
