//! LLM integration for the classifier.
//!
//! `LlmProvider` is the seam the classifier depends on. Transport is
//! rig-core; `RigAdapter` bridges rig's `CompletionModel` to our trait.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;
use std::time::Duration;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::config::TriageConfig;
use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub timeout: Duration,
}

impl From<&TriageConfig> for LlmConfig {
    fn from(config: &TriageConfig) -> Self {
        Self {
            api_key: config.anthropic_api_key.clone(),
            model: config.model.clone(),
            timeout: config.http_timeout,
        }
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(
        RigAdapter::new(model, &config.model).with_timeout(config.timeout),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_constructs_without_network() {
        // The key is only checked by the API on the first request.
        let config = LlmConfig {
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-3-5-sonnet-latest".to_string(),
            timeout: Duration::from_secs(10),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "claude-3-5-sonnet-latest");
    }
}
