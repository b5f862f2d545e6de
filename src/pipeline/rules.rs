//! Ownership override rules.
//!
//! Overrides run before the bucket table lookup. Some features live inside a
//! bucket but belong to a different owner (e.g. Native Datatypes sits under
//! Storage but has its own owner). Rules are evaluated in order and the
//! first match wins.

use regex::Regex;
use tracing::debug;

use crate::tracker::Issue;

/// What an override rule matches against.
#[derive(Debug, Clone)]
pub enum OverrideCondition {
    /// The classified bucket equals this name (case-insensitive).
    Bucket(String),
    /// The issue title matches this pattern.
    TitleMatches(Regex),
}

/// A single override: condition → forced owner (and optionally bucket).
#[derive(Debug, Clone)]
pub struct OverrideRule {
    /// Short name for logs and the audit comment.
    pub name: String,
    pub condition: OverrideCondition,
    /// Owner that replaces the table lookup.
    pub owner: String,
    /// Bucket label that replaces the classified one, if set.
    pub bucket: Option<String>,
}

impl OverrideRule {
    fn matches(&self, issue: &Issue, classified_bucket: &str) -> bool {
        match &self.condition {
            OverrideCondition::Bucket(name) => name.eq_ignore_ascii_case(classified_bucket.trim()),
            OverrideCondition::TitleMatches(regex) => regex.is_match(&issue.title),
        }
    }
}

/// Ordered override rule set.
#[derive(Debug, Clone, Default)]
pub struct OverrideRules {
    rules: Vec<OverrideRule>,
}

impl OverrideRules {
    /// The standing overrides.
    pub fn default_rules() -> Self {
        let rules = vec![
            OverrideRule {
                name: "native-datatypes".into(),
                condition: OverrideCondition::Bucket("Native Datatypes".into()),
                owner: "Zuzana Bednarova".into(),
                bucket: None,
            },
            // Title mentions win even when the classifier picked Storage.
            OverrideRule {
                name: "native-datatypes-title".into(),
                condition: OverrideCondition::TitleMatches(
                    Regex::new(r"(?i)\bnative[\s_-]*data[\s_-]*types?\b").unwrap(),
                ),
                owner: "Zuzana Bednarova".into(),
                bucket: Some("Native Datatypes".into()),
            },
        ];
        Self { rules }
    }

    /// No overrides (for testing).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Force `owner` whenever the classifier picks `bucket`.
    pub fn add_bucket_rule(&mut self, bucket: &str, owner: &str) {
        self.rules.push(OverrideRule {
            name: format!("bucket:{}", bucket.to_lowercase()),
            condition: OverrideCondition::Bucket(bucket.into()),
            owner: owner.into(),
            bucket: None,
        });
    }

    /// Force `owner` (and optionally `bucket`) when the title matches `pattern`.
    pub fn add_title_rule(
        &mut self,
        pattern: &str,
        owner: &str,
        bucket: Option<&str>,
    ) -> Result<(), regex::Error> {
        self.rules.push(OverrideRule {
            name: format!("title:{pattern}"),
            condition: OverrideCondition::TitleMatches(Regex::new(pattern)?),
            owner: owner.into(),
            bucket: bucket.map(String::from),
        });
        Ok(())
    }

    /// First rule matching the issue and its classified bucket.
    pub fn evaluate(&self, issue: &Issue, classified_bucket: &str) -> Option<&OverrideRule> {
        let rule = self
            .rules
            .iter()
            .find(|r| r.matches(issue, classified_bucket))?;
        debug!(
            issue = %issue.identifier,
            rule = %rule.name,
            owner = %rule.owner,
            "Override rule matched"
        );
        Some(rule)
    }

    /// Buckets that only exist as overrides, with their owners. The
    /// classifier is told about these so it can pick them.
    pub fn override_buckets(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = Vec::new();
        for rule in &self.rules {
            let name = match (&rule.condition, &rule.bucket) {
                (OverrideCondition::Bucket(name), _) => name.as_str(),
                (OverrideCondition::TitleMatches(_), Some(bucket)) => bucket.as_str(),
                (OverrideCondition::TitleMatches(_), None) => continue,
            };
            if !out.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                out.push((name, rule.owner.as_str()));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_rule_matches_case_insensitively() {
        let rules = OverrideRules::default_rules();
        let issue = Issue::new("PROF-24", "Support decimal columns");
        let rule = rules.evaluate(&issue, "native datatypes").unwrap();
        assert_eq!(rule.owner, "Zuzana Bednarova");
        assert!(rule.bucket.is_none());
    }

    #[test]
    fn title_rule_matches_when_bucket_differs() {
        let rules = OverrideRules::default_rules();
        let issue = Issue::new("PROF-30", "Native data types are lost on export");
        let rule = rules.evaluate(&issue, "Storage").unwrap();
        assert_eq!(rule.name, "native-datatypes-title");
        assert_eq!(rule.bucket.as_deref(), Some("Native Datatypes"));
    }

    #[test]
    fn unrelated_issue_has_no_override() {
        let rules = OverrideRules::default_rules();
        let issue = Issue::new("PROF-31", "Slow writes to Snowflake");
        assert!(rules.evaluate(&issue, "Storage").is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut rules = OverrideRules::empty();
        rules.add_bucket_rule("AI", "First");
        rules.add_bucket_rule("ai", "Second");
        let issue = Issue::new("PROF-1", "x");
        assert_eq!(rules.evaluate(&issue, "AI").unwrap().owner, "First");
    }

    #[test]
    fn custom_title_rule() {
        let mut rules = OverrideRules::empty();
        rules
            .add_title_rule(r"(?i)\bbilling\b", "Finance Lead", Some("Billing"))
            .unwrap();
        let issue = Issue::new("PROF-2", "Billing page shows wrong VAT");
        let rule = rules.evaluate(&issue, "UX").unwrap();
        assert_eq!(rule.owner, "Finance Lead");
    }

    #[test]
    fn invalid_title_pattern_is_rejected() {
        let mut rules = OverrideRules::empty();
        assert!(rules.add_title_rule("(", "x", None).is_err());
        assert!(rules.is_empty());
    }

    #[test]
    fn empty_rules_match_nothing() {
        let rules = OverrideRules::empty();
        let issue = Issue::new("PROF-3", "native datatypes");
        assert!(rules.evaluate(&issue, "Native Datatypes").is_none());
    }

    #[test]
    fn override_buckets_are_deduplicated() {
        let rules = OverrideRules::default_rules();
        assert_eq!(
            rules.override_buckets(),
            vec![("Native Datatypes", "Zuzana Bednarova")]
        );
    }
}
