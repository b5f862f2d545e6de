//! Topic classification of triage issues.
//!
//! The classifier answers one question per issue: which bucket, how sure,
//! and why. It never guesses: an unusable model reply is an error and the
//! issue is left for the next run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::buckets::BucketTable;
use crate::error::ClassificationError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::tracker::Issue;

/// Max tokens for the classification call. The reply is one small object.
const CLASSIFY_MAX_TOKENS: u32 = 400;

const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Description characters sent to the model.
const DESCRIPTION_PREVIEW_CHARS: usize = 4000;

/// Classifier verdict for one issue.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Bucket name, in the table's spelling when the table knows it.
    pub bucket: String,
    /// 0.0–1.0.
    pub confidence: f32,
    /// Runner-up bucket when the model was torn.
    pub alternative_bucket: Option<String>,
    pub rationale: String,
}

impl Classification {
    pub fn new(bucket: impl Into<String>, confidence: f32) -> Self {
        Self {
            bucket: bucket.into(),
            confidence: confidence.clamp(0.0, 1.0),
            alternative_bucket: None,
            rationale: String::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_alternative(mut self, bucket: impl Into<String>) -> Self {
        self.alternative_bucket = Some(bucket.into());
        self
    }
}

/// Something that can classify an issue into a bucket.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, issue: &Issue) -> Result<Classification, ClassificationError>;
}

/// Classifier backed by a chat-completion model.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
    buckets: Arc<BucketTable>,
    /// Buckets that exist only as ownership overrides (name, owner).
    special_buckets: Vec<(String, String)>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, buckets: Arc<BucketTable>) -> Self {
        Self {
            llm,
            buckets,
            special_buckets: Vec::new(),
        }
    }

    /// Tell the model about an override-only bucket.
    pub fn with_special_bucket(mut self, name: &str, owner: &str) -> Self {
        self.special_buckets.push((name.to_string(), owner.to_string()));
        self
    }

    fn system_prompt(&self) -> String {
        build_system_prompt(&self.buckets, &self.special_buckets)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, issue: &Issue) -> Result<Classification, ClassificationError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(build_user_prompt(issue)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response =
            self.llm
                .complete(request)
                .await
                .map_err(|source| ClassificationError::Llm {
                    identifier: issue.identifier.clone(),
                    source,
                })?;

        debug!(
            issue = %issue.identifier,
            model = self.llm.model_name(),
            output_tokens = response.output_tokens,
            "Classifier replied"
        );

        parse_classification(&response.content, &self.buckets).map_err(|reason| {
            warn!(
                issue = %issue.identifier,
                raw_response = %response.content,
                error = %reason,
                "Failed to parse classifier reply"
            );
            ClassificationError::Parse {
                identifier: issue.identifier.clone(),
                reason,
            }
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt(buckets: &BucketTable, special: &[(String, String)]) -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str(
        "You are a product operations assistant triaging product feedback issues. \
         Classify each issue into exactly one bucket.\n\n\
         Available buckets:\n",
    );
    prompt.push_str(&buckets.prompt_listing());
    prompt.push('\n');

    if !special.is_empty() {
        prompt.push_str("\nSpecial features (use these instead of their parent bucket):\n");
        for (name, owner) in special {
            prompt.push_str(&format!("- {name}: owned by {owner}\n"));
        }
    }

    prompt.push_str(
        "\nRespond with ONLY a JSON object:\n\
         {\"bucket\": \"...\", \"alternative_bucket\": null, \"confidence\": 0.0, \"rationale\": \"...\"}\n\n\
         Rules:\n\
         - bucket must be one of the names above, spelled exactly\n\
         - alternative_bucket is the runner-up when you are torn between two buckets, otherwise null\n\
         - confidence is 0.0-1.0; go lower when another bucket is plausible\n\
         - rationale is 1-2 sentences",
    );
    prompt
}

fn build_user_prompt(issue: &Issue) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(&format!("Issue: {}\n", issue.identifier));
    prompt.push_str(&format!("Title: {}\n", issue.title));

    let labels = issue.label_names();
    if labels.is_empty() {
        prompt.push_str("Labels: none\n");
    } else {
        prompt.push_str(&format!("Labels: {}\n", labels.join(", ")));
    }

    let description = issue
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    match description {
        Some(text) => {
            let preview: String = text.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
            prompt.push_str(&format!("\nDescription:\n{preview}"));
        }
        None => prompt.push_str("\nDescription: (none)"),
    }
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ClassifierResponse {
    #[serde(default, alias = "primary_bucket")]
    bucket: String,
    #[serde(default, alias = "secondary_bucket")]
    alternative_bucket: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default, alias = "reasoning")]
    rationale: String,
}

/// Parse the model reply into a `Classification`.
fn parse_classification(raw: &str, buckets: &BucketTable) -> Result<Classification, String> {
    let json_str = extract_json_object(raw);
    let response: ClassifierResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let bucket = response.bucket.trim();
    if bucket.is_empty() {
        return Err("reply has no bucket".into());
    }
    let bucket = buckets.canonical_name(bucket).to_string();

    let confidence = response
        .confidence
        .ok_or_else(|| "reply has no confidence".to_string())?;
    if !confidence.is_finite() {
        return Err(format!("confidence {confidence} is not a number"));
    }

    let alternative_bucket = response
        .alternative_bucket
        .map(|b| b.trim().to_string())
        .filter(|b| {
            !b.is_empty() && !b.eq_ignore_ascii_case("null") && !b.eq_ignore_ascii_case("none")
        })
        .map(|b| buckets.canonical_name(&b).to_string())
        .filter(|b| !b.eq_ignore_ascii_case(&bucket));

    Ok(Classification {
        bucket,
        confidence: confidence.clamp(0.0, 1.0),
        alternative_bucket,
        rationale: response.rationale.trim().to_string(),
    })
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buckets::BucketEntry;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;

    fn table() -> BucketTable {
        BucketTable::from_entries([
            BucketEntry::new("Storage", "Alice").with_note("tables, files, backends"),
            BucketEntry::new("AI", "Bob"),
            BucketEntry::new("Components", "Carol"),
        ])
    }

    // ── Prompt construction tests ───────────────────────────────────

    #[test]
    fn system_prompt_lists_buckets_and_special_features() {
        let special = vec![("Native Datatypes".to_string(), "Zuzana Bednarova".to_string())];
        let prompt = build_system_prompt(&table(), &special);
        assert!(prompt.contains("- Storage: tables, files, backends"));
        assert!(prompt.contains("- AI"));
        assert!(prompt.contains("Native Datatypes: owned by Zuzana Bednarova"));
        assert!(prompt.contains("\"confidence\""));
    }

    #[test]
    fn system_prompt_without_special_features() {
        let prompt = build_system_prompt(&table(), &[]);
        assert!(!prompt.contains("Special features"));
    }

    #[test]
    fn user_prompt_includes_issue_fields() {
        let issue = Issue::new("PROF-23", "Slow writes")
            .with_description("Writing 10M rows takes an hour")
            .with_label("Bug");
        let prompt = build_user_prompt(&issue);
        assert!(prompt.contains("PROF-23"));
        assert!(prompt.contains("Title: Slow writes"));
        assert!(prompt.contains("Labels: Bug"));
        assert!(prompt.contains("10M rows"));
    }

    #[test]
    fn user_prompt_truncates_description() {
        let issue = Issue::new("PROF-1", "Long").with_description("x".repeat(10_000));
        let prompt = build_user_prompt(&issue);
        assert!(prompt.len() < DESCRIPTION_PREVIEW_CHARS + 200);
    }

    #[test]
    fn user_prompt_marks_missing_description() {
        let prompt = build_user_prompt(&Issue::new("PROF-1", "Empty").with_description("   "));
        assert!(prompt.contains("Description: (none)"));
        assert!(prompt.contains("Labels: none"));
    }

    // ── Response parsing tests ──────────────────────────────────────

    #[test]
    fn parses_plain_reply() {
        let raw = r#"{"bucket": "storage", "alternative_bucket": null, "confidence": 0.92, "rationale": "About write speed."}"#;
        let c = parse_classification(raw, &table()).unwrap();
        assert_eq!(c.bucket, "Storage");
        assert!((c.confidence - 0.92).abs() < 1e-6);
        assert!(c.alternative_bucket.is_none());
        assert_eq!(c.rationale, "About write speed.");
    }

    #[test]
    fn parses_reply_in_markdown_fence() {
        let raw = "Here you go:\n```json\n{\"bucket\": \"AI\", \"confidence\": 0.5, \"rationale\": \"r\"}\n```";
        let c = parse_classification(raw, &table()).unwrap();
        assert_eq!(c.bucket, "AI");
    }

    #[test]
    fn accepts_legacy_field_names() {
        let raw = r#"{"primary_bucket": "Components", "secondary_bucket": "AI", "confidence": 0.4, "reasoning": "Could be either."}"#;
        let c = parse_classification(raw, &table()).unwrap();
        assert_eq!(c.bucket, "Components");
        assert_eq!(c.alternative_bucket.as_deref(), Some("AI"));
        assert_eq!(c.rationale, "Could be either.");
    }

    #[test]
    fn alternative_equal_to_bucket_is_dropped() {
        let raw = r#"{"bucket": "AI", "alternative_bucket": "ai", "confidence": 0.8, "rationale": ""}"#;
        assert!(parse_classification(raw, &table()).unwrap().alternative_bucket.is_none());
    }

    #[test]
    fn string_null_alternative_is_dropped() {
        let raw = r#"{"bucket": "AI", "alternative_bucket": "null", "confidence": 0.8}"#;
        assert!(parse_classification(raw, &table()).unwrap().alternative_bucket.is_none());
    }

    #[test]
    fn unknown_bucket_is_kept_verbatim() {
        let raw = r#"{"bucket": " Native Datatypes ", "confidence": 0.88, "rationale": "decimals"}"#;
        let c = parse_classification(raw, &table()).unwrap();
        assert_eq!(c.bucket, "Native Datatypes");
    }

    #[test]
    fn confidence_is_clamped() {
        let raw = r#"{"bucket": "AI", "confidence": 1.7}"#;
        assert_eq!(parse_classification(raw, &table()).unwrap().confidence, 1.0);
        let raw = r#"{"bucket": "AI", "confidence": -3}"#;
        assert_eq!(parse_classification(raw, &table()).unwrap().confidence, 0.0);
    }

    #[test]
    fn missing_confidence_fails() {
        assert!(parse_classification(r#"{"bucket": "AI"}"#, &table()).is_err());
    }

    #[test]
    fn missing_bucket_fails() {
        assert!(parse_classification(r#"{"confidence": 0.9}"#, &table()).is_err());
    }

    #[test]
    fn prose_reply_fails() {
        assert!(parse_classification("I think this is about storage.", &table()).is_err());
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "Verdict: {\"bucket\": \"AI\"} done.";
        let result = extract_json_object(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
    }

    // ── Classifier with mock LLM ────────────────────────────────────

    struct MockLlm {
        reply: Result<String, ()>,
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-classifier"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            assert_eq!(request.max_tokens, Some(CLASSIFY_MAX_TOKENS));
            match &self.reply {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 200,
                    output_tokens: 40,
                }),
                Err(()) => Err(LlmError::Timeout {
                    provider: "mock".into(),
                    timeout: std::time::Duration::from_secs(1),
                }),
            }
        }
    }

    fn classifier(reply: Result<String, ()>) -> LlmClassifier {
        LlmClassifier::new(Arc::new(MockLlm { reply }), Arc::new(table()))
            .with_special_bucket("Native Datatypes", "Zuzana Bednarova")
    }

    #[tokio::test]
    async fn classify_returns_parsed_verdict() {
        let classifier = classifier(Ok(
            r#"{"bucket": "Storage", "confidence": 0.92, "rationale": "Write path."}"#.into(),
        ));
        let issue = Issue::new("PROF-23", "Slow writes");
        let c = classifier.classify(&issue).await.unwrap();
        assert_eq!(c.bucket, "Storage");
        assert!((c.confidence - 0.92).abs() < 1e-6);
    }

    #[tokio::test]
    async fn classify_timeout_is_llm_error() {
        let classifier = classifier(Err(()));
        let err = classifier
            .classify(&Issue::new("PROF-9", "x"))
            .await
            .unwrap_err();
        match err {
            ClassificationError::Llm { identifier, source } => {
                assert_eq!(identifier, "PROF-9");
                assert!(matches!(source, LlmError::Timeout { .. }));
            }
            other => panic!("Expected Llm error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn classify_garbage_is_parse_error() {
        let classifier = classifier(Ok("no idea".into()));
        let err = classifier
            .classify(&Issue::new("PROF-10", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassificationError::Parse { .. }));
    }
}
