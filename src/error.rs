//! Error types for feedback triage.
//!
//! Fatal kinds (`ConfigError`, `FetchError`) abort a run before anything is
//! written. Per-issue kinds (`ClassificationError`, `BucketLookupError`,
//! `WriteBackError`) never escape the issue being processed.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Bucket table {path} could not be loaded: {reason}")]
    BucketTable { path: PathBuf, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Transport-level errors from the issue tracker client.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tracker returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Invalid issue identifier '{0}' (expected TEAM-123)")]
    InvalidIdentifier(String),

    #[error("Owner '{0}' is not a member of the team")]
    UnknownMember(String),

    #[error("Mutation {0} reported success = false")]
    MutationRejected(String),
}

/// Fetching the work list failed. Nothing has been written yet.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Listing triage issues for team {team} failed: {source}")]
    List {
        team: String,
        #[source]
        source: TrackerError,
    },

    #[error("Fetching issue {identifier} failed: {source}")]
    Issue {
        identifier: String,
        #[source]
        source: TrackerError,
    },
}

/// Classifying one issue failed. The issue is skipped, never guessed.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Classifier call for {identifier} failed: {source}")]
    Llm {
        identifier: String,
        #[source]
        source: LlmError,
    },

    #[error("Classifier reply for {identifier} unusable: {reason}")]
    Parse { identifier: String, reason: String },
}

/// The classified bucket has no row in the bucket table.
#[derive(Debug, thiserror::Error)]
#[error("Bucket '{bucket}' has no owner in the bucket table")]
pub struct BucketLookupError {
    pub bucket: String,
}

/// Which write-back call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBackStep {
    SetAssignee,
    AddComment,
    AddLabel,
}

impl fmt::Display for WriteBackStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SetAssignee => "set assignee",
            Self::AddComment => "add comment",
            Self::AddLabel => "add label",
        })
    }
}

/// A write-back call failed after a decision was made.
#[derive(Debug, thiserror::Error)]
#[error("{step} on {identifier} failed: {source}")]
pub struct WriteBackError {
    pub identifier: String,
    pub step: WriteBackStep,
    #[source]
    pub source: TrackerError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_back_error_names_step_and_issue() {
        let err = WriteBackError {
            identifier: "PROF-7".into(),
            step: WriteBackStep::AddLabel,
            source: TrackerError::MutationRejected("issueUpdate".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("add label"));
        assert!(msg.contains("PROF-7"));
    }

    #[test]
    fn bucket_lookup_error_mentions_bucket() {
        let err = BucketLookupError {
            bucket: "Quantum".into(),
        };
        assert!(err.to_string().contains("Quantum"));
    }

    #[test]
    fn fetch_error_keeps_source() {
        use std::error::Error as _;

        let err = FetchError::Issue {
            identifier: "PROF-1".into(),
            source: TrackerError::InvalidIdentifier("PROF".into()),
        };
        assert!(err.source().is_some());
    }
}
