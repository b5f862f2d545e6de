//! Bridge from rig-core's `CompletionModel` to our `LlmProvider` trait.

use std::time::Duration;

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::message::{AssistantContent, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Wraps any rig completion model as an `LlmProvider`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: String,
    timeout: Duration,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: "anthropic".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<M: CompletionModel> LlmProvider for RigAdapter<M> {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, history, prompt) =
            split_messages(&request.messages).ok_or_else(|| LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: "request has no user message".to_string(),
            })?;

        let mut builder = self
            .model
            .completion_request(Message::user(prompt.content.clone()))
            .messages(history.into_iter().map(to_rig_message).collect());
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.provider.clone(),
                timeout: self.timeout,
            })?
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.clone(),
                reason: e.to_string(),
            })?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: "reply contains no text".to_string(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: saturate(response.usage.input_tokens),
            output_tokens: saturate(response.usage.output_tokens),
        })
    }
}

/// Split our flat message list into rig's shape: system text becomes the
/// preamble, the last user message is the prompt, everything between is
/// chat history. `None` when there is no user message to send.
fn split_messages(
    messages: &[ChatMessage],
) -> Option<(Option<String>, Vec<&ChatMessage>, &ChatMessage)> {
    let prompt_idx = messages.iter().rposition(|m| m.role == Role::User)?;

    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));

    let history = messages[..prompt_idx]
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();

    Some((preamble, history, &messages[prompt_idx]))
}

fn to_rig_message(message: &ChatMessage) -> Message {
    match message.role {
        Role::Assistant => Message::assistant(message.content.clone()),
        _ => Message::user(message.content.clone()),
    }
}

fn saturate(tokens: u64) -> u32 {
    u32::try_from(tokens).unwrap_or(u32::MAX)
}
