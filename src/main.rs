use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use feedback_triage::buckets::BucketTable;
use feedback_triage::classifier::LlmClassifier;
use feedback_triage::cli::Cli;
use feedback_triage::config::TriageConfig;
use feedback_triage::llm::{LlmConfig, create_provider};
use feedback_triage::pipeline::{IssueOutcome, OverrideRules, RunMode, RunReport, TriageEngine};
use feedback_triage::tracker::LinearClient;

const LOG_FILE_NAME: &str = "triage.log";

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine; real env vars still apply.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = TriageConfig::from_env();
    let log_dir = config.as_ref().ok().and_then(|c| c.log_dir.clone());
    let _log_guard = init_tracing(cli.log_filter(), log_dir.as_deref());

    let run_id = Uuid::new_v4();
    let mode = cli.mode();
    info!(
        run_id = %run_id,
        mode = mode.label(),
        issue = cli.issue.as_deref(),
        "Triage run started"
    );

    let result = match config {
        Ok(mut config) => {
            cli.apply_overrides(&mut config);
            run(&cli, config).await
        }
        Err(e) => Err(anyhow::Error::new(e).context("loading configuration")),
    };

    let code = match result {
        Ok(report) => {
            print_report(&report);
            0
        }
        Err(e) => {
            error!(run_id = %run_id, error = %format!("{e:#}"), "Triage run aborted");
            eprintln!("Error: {e:#}");
            1
        }
    };

    info!(run_id = %run_id, exit_code = code, "Triage run finished");
    ExitCode::from(code)
}

async fn run(cli: &Cli, config: TriageConfig) -> anyhow::Result<RunReport> {
    let mode = cli.mode();

    let buckets = Arc::new(BucketTable::load(&config.buckets_path).with_context(|| {
        format!("loading bucket table {}", config.buckets_path.display())
    })?);
    let rules = OverrideRules::default_rules();

    eprintln!("📋 Feedback triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {}", mode_banner(mode));
    eprintln!("   Team: {}", config.team_key);
    eprintln!(
        "   Buckets: {} ({} rows, {} overrides)",
        config.buckets_path.display(),
        buckets.len(),
        rules.len()
    );
    eprintln!("   Model: {}", config.model);
    eprintln!("   Review threshold: {:.2}\n", config.confidence_threshold);

    let llm = create_provider(&LlmConfig::from(&config)).context("creating LLM provider")?;
    let mut classifier = LlmClassifier::new(llm, buckets.clone());
    for (bucket, owner) in rules.override_buckets() {
        classifier = classifier.with_special_bucket(bucket, owner);
    }

    let tracker = LinearClient::new(
        config.linear_api_key.clone(),
        config.linear_api_url.clone(),
        config.http_timeout,
    )
    .context("creating Linear client")?;

    let engine = TriageEngine::new(
        Arc::new(tracker),
        Arc::new(classifier),
        buckets,
        rules,
        config.confidence_threshold,
        mode,
    );

    let report = match &cli.issue {
        Some(identifier) => engine.run_single(identifier).await?,
        None => engine.run_batch(&config.team_key).await?,
    };
    Ok(report)
}

/// Stderr logging plus an optional append-only file. The guard must live
/// until exit so buffered lines are flushed.
fn init_tracing(default_filter: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let mut guard = None;
    let file_layer = log_dir.and_then(|dir| {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE_NAME)
            .build(dir);
        match appender {
            Ok(appender) => {
                let (writer, worker_guard) = tracing_appender::non_blocking(appender);
                guard = Some(worker_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
            }
            Err(e) => {
                eprintln!("   Warning: cannot open log file in {}: {}", dir.display(), e);
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn mode_banner(mode: RunMode) -> &'static str {
    match mode {
        RunMode::DryRun => "dry run (pass --execute to write back)",
        RunMode::Execute => "execute",
    }
}

fn print_report(report: &RunReport) {
    let execute = report.summary.mode.is_execute();
    for outcome in &report.outcomes {
        match outcome {
            IssueOutcome::Skipped { identifier, reason } => {
                println!("{identifier}  skipped ({reason})")
            }
            IssueOutcome::Applied(decision) | IssueOutcome::Previewed(decision) => {
                let verb = if execute { "assigned" } else { "would assign" };
                let owner = decision.owner.as_deref().unwrap_or("nobody");
                let mut line = format!(
                    "{}  {} → {} {} ({:.2})",
                    decision.identifier,
                    decision.bucket,
                    verb,
                    owner,
                    decision.classification.confidence
                );
                if decision.needs_review() {
                    let reasons: Vec<String> =
                        decision.review_reasons.iter().map(|r| r.to_string()).collect();
                    line.push_str(&format!("  [needs-review: {}]", reasons.join("; ")));
                }
                println!("{line}");
            }
            IssueOutcome::Failed { identifier, error } => {
                println!("{identifier}  failed: {error}")
            }
        }
    }
    println!("\n{}", report.summary);
}
