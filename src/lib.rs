//! Feedback triage: routes unassigned triage issues to their owners.

pub mod buckets;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod tracker;
