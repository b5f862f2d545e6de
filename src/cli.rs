//! Command-line interface definition using clap.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{TriageConfig, parse_threshold};
use crate::pipeline::RunMode;

/// Assign unowned triage issues to bucket owners using an LLM classifier.
///
/// Runs as a dry run unless `--execute` is given.
#[derive(Parser, Debug)]
#[command(name = "feedback-triage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Write assignees, comments and labels back to the tracker
    #[arg(long)]
    pub execute: bool,

    /// Process a single issue by key (e.g. PROF-23)
    #[arg(long, value_name = "KEY")]
    pub issue: Option<String>,

    /// Path to the bucket → owner table
    #[arg(long, value_name = "PATH")]
    pub buckets: Option<PathBuf>,

    /// Team key whose triage queue is processed
    #[arg(long, value_name = "KEY")]
    pub team: Option<String>,

    /// Confidence below this flags the issue for review (0.0-1.0)
    #[arg(long, value_name = "F", value_parser = threshold_arg)]
    pub threshold: Option<f32>,

    /// Enable verbose output (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn mode(&self) -> RunMode {
        RunMode::from_execute_flag(self.execute)
    }

    /// Flags take precedence over the environment.
    pub fn apply_overrides(&self, config: &mut TriageConfig) {
        if let Some(path) = &self.buckets {
            config.buckets_path = path.clone();
        }
        if let Some(team) = &self.team {
            config.team_key = team.trim().to_uppercase();
        }
        if let Some(threshold) = self.threshold {
            config.confidence_threshold = threshold;
        }
    }

    /// Default log filter for the verbosity level.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "feedback_triage=debug,info",
            _ => "feedback_triage=trace,debug",
        }
    }
}

fn threshold_arg(raw: &str) -> Result<f32, String> {
    parse_threshold(raw).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TriageConfig {
        TriageConfig::from_lookup(|key| match key {
            "LINEAR_API_KEY" => Some("lin".into()),
            "ANTHROPIC_API_KEY" => Some("sk".into()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn defaults_to_dry_run_batch() {
        let cli = Cli::try_parse_from(["feedback-triage"]).unwrap();
        assert_eq!(cli.mode(), RunMode::DryRun);
        assert!(cli.issue.is_none());
        assert_eq!(cli.log_filter(), "info");
    }

    #[test]
    fn execute_single_issue() {
        let cli =
            Cli::try_parse_from(["feedback-triage", "--execute", "--issue", "PROF-23"]).unwrap();
        assert_eq!(cli.mode(), RunMode::Execute);
        assert_eq!(cli.issue.as_deref(), Some("PROF-23"));
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "feedback-triage",
            "--buckets",
            "/tmp/owners.csv",
            "--team",
            "prof",
            "--threshold",
            "0.55",
        ])
        .unwrap();
        let mut config = config();
        cli.apply_overrides(&mut config);
        assert_eq!(config.buckets_path, PathBuf::from("/tmp/owners.csv"));
        assert_eq!(config.team_key, "PROF");
        assert!((config.confidence_threshold - 0.55).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        assert!(Cli::try_parse_from(["feedback-triage", "--threshold", "1.5"]).is_err());
    }

    #[test]
    fn verbosity_raises_log_level() {
        let cli = Cli::try_parse_from(["feedback-triage", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.log_filter().contains("trace"));
    }
}
