//! Bridges rig's `CompletionModel` to [`LlmProvider`].

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{Chat, CompletionModel, Message};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, LlmProvider};

const MAX_TOKENS: u64 = 2000;
const TEMPERATURE: f64 = 0.7;

/// Wraps any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }
}

fn to_rig(message: &ChatMessage) -> Message {
    Message::user(message.content.clone())
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let (last, history) = messages
            .split_last()
            .ok_or_else(|| LlmError::EmptyConversation {
                provider: self.provider.to_string(),
            })?;

        let agent = AgentBuilder::new(self.model.clone())
            .preamble(system_prompt)
            .max_tokens(MAX_TOKENS)
            .temperature(TEMPERATURE)
            .build();

        debug!(
            model = %self.model_name,
            history = history.len(),
            "Sending completion request"
        );

        let history: Vec<Message> = history.iter().map(to_rig).collect();
        let text = agent
            .chat(to_rig(last), history)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })?;

        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "empty completion".to_string(),
            });
        }

        Ok(text)
    }
}
