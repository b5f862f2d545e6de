//! Configuration types.
//!
//! Everything comes from the process environment (a `.env` file is loaded
//! by the binary first). Credentials are never hardcoded.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

pub const LINEAR_API_KEY_ENV: &str = "LINEAR_API_KEY";
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Linear GraphQL endpoint.
pub const DEFAULT_LINEAR_API_URL: &str = "https://api.linear.app/graphql";
/// Product Feedback & Requests team.
pub const DEFAULT_TEAM_KEY: &str = "PROF";
pub const DEFAULT_BUCKETS_PATH: &str = "buckets.csv";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
/// Confidence below this adds the needs-review label.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Triage run configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Linear personal API key.
    pub linear_api_key: SecretString,
    /// Anthropic API key.
    pub anthropic_api_key: SecretString,
    pub linear_api_url: String,
    /// Team whose triage queue is processed.
    pub team_key: String,
    /// Path to the bucket → owner table.
    pub buckets_path: PathBuf,
    /// Classifier model name.
    pub model: String,
    /// Confidence strictly below this value flags the issue for review.
    pub confidence_threshold: f32,
    /// Per-request timeout for the tracker and the model.
    pub http_timeout: Duration,
    /// Directory for the append-only run log (stderr only when unset).
    pub log_dir: Option<PathBuf>,
}

impl TriageConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let linear_api_key = get(LINEAR_API_KEY_ENV)
            .ok_or_else(|| ConfigError::MissingEnvVar(LINEAR_API_KEY_ENV.to_string()))?;
        let anthropic_api_key = get(ANTHROPIC_API_KEY_ENV)
            .ok_or_else(|| ConfigError::MissingEnvVar(ANTHROPIC_API_KEY_ENV.to_string()))?;

        let confidence_threshold = match get("TRIAGE_CONFIDENCE_THRESHOLD") {
            Some(raw) => parse_threshold(&raw)?,
            None => DEFAULT_CONFIDENCE_THRESHOLD,
        };

        let http_timeout_secs: u64 = match get("TRIAGE_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TRIAGE_HTTP_TIMEOUT_SECS".into(),
                message: format!("'{raw}' is not a whole number of seconds"),
            })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Self {
            linear_api_key: SecretString::from(linear_api_key),
            anthropic_api_key: SecretString::from(anthropic_api_key),
            linear_api_url: get("LINEAR_API_URL")
                .unwrap_or_else(|| DEFAULT_LINEAR_API_URL.to_string()),
            team_key: get("TRIAGE_TEAM_KEY").unwrap_or_else(|| DEFAULT_TEAM_KEY.to_string()),
            buckets_path: get("TRIAGE_BUCKETS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BUCKETS_PATH)),
            model: get("TRIAGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            confidence_threshold,
            http_timeout: Duration::from_secs(http_timeout_secs),
            log_dir: get("TRIAGE_LOG_DIR").map(PathBuf::from),
        })
    }
}

/// Parse and range-check a confidence threshold.
pub fn parse_threshold(raw: &str) -> Result<f32, ConfigError> {
    let value: f32 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: "confidence threshold".into(),
        message: format!("'{raw}' is not a number"),
    })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidValue {
            key: "confidence threshold".into(),
            message: format!("{value} is outside 0.0..=1.0"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_keys_set() {
        let config = TriageConfig::from_lookup(lookup(&[
            ("LINEAR_API_KEY", "lin_api_x"),
            ("ANTHROPIC_API_KEY", "sk-ant-x"),
        ]))
        .unwrap();

        assert_eq!(config.linear_api_key.expose_secret(), "lin_api_x");
        assert_eq!(config.team_key, "PROF");
        assert_eq!(config.buckets_path, PathBuf::from("buckets.csv"));
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!((config.confidence_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.http_timeout, Duration::from_secs(60));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn missing_linear_key_is_reported() {
        let err = TriageConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "sk")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "LINEAR_API_KEY"));
    }

    #[test]
    fn blank_anthropic_key_counts_as_missing() {
        let err = TriageConfig::from_lookup(lookup(&[
            ("LINEAR_API_KEY", "lin"),
            ("ANTHROPIC_API_KEY", "   "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "ANTHROPIC_API_KEY"));
    }

    #[test]
    fn overrides_are_read() {
        let config = TriageConfig::from_lookup(lookup(&[
            ("LINEAR_API_KEY", "lin"),
            ("ANTHROPIC_API_KEY", "sk"),
            ("TRIAGE_TEAM_KEY", "ENG"),
            ("TRIAGE_CONFIDENCE_THRESHOLD", "0.55"),
            ("TRIAGE_HTTP_TIMEOUT_SECS", "5"),
            ("TRIAGE_LOG_DIR", "/var/log/triage"),
        ]))
        .unwrap();

        assert_eq!(config.team_key, "ENG");
        assert!((config.confidence_threshold - 0.55).abs() < 1e-6);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/triage")));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        assert!(parse_threshold("1.5").is_err());
        assert!(parse_threshold("-0.1").is_err());
        assert!(parse_threshold("high").is_err());
        assert!(parse_threshold("0").is_ok());
        assert!(parse_threshold("1.0").is_ok());
    }
}
