use async_trait::async_trait;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;
use log::debug;

use blocksmith_core::{ai_configured, AiSettings};

use crate::error::GenerateError;
use crate::prompt::{Role, Turn};

const TEMPERATURE: f32 = 0.1;

pub(crate) fn map_backend(provider: &str) -> Option<LLMBackend> {
    match provider {
        "openai" => Some(LLMBackend::OpenAI),
        "anthropic" => Some(LLMBackend::Anthropic),
        "google" => Some(LLMBackend::Google),
        "ollama" => Some(LLMBackend::Ollama),
        "groq" => Some(LLMBackend::Groq),
        "mistral" => Some(LLMBackend::Mistral),
        "deepseek" => Some(LLMBackend::DeepSeek),
        _ => None,
    }
}

/// A chat completion backend. Takes the system prompt, prior turns and the
/// final user message; returns the raw reply text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier reported back to callers.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        user: &str,
    ) -> Result<String, GenerateError>;
}

/// [`ChatModel`] backed by the `llm` crate.
pub struct LlmChatModel {
    settings: AiSettings,
    backend: LLMBackend,
}

impl LlmChatModel {
    pub fn new(settings: AiSettings) -> Result<Self, GenerateError> {
        if !ai_configured(&settings) {
            return Err(GenerateError::NotConfigured);
        }
        let backend = map_backend(&settings.provider)
            .ok_or_else(|| GenerateError::UnknownProvider(settings.provider.clone()))?;
        Ok(Self { settings, backend })
    }
}

#[async_trait]
impl ChatModel for LlmChatModel {
    fn name(&self) -> &str {
        &self.settings.model
    }

    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        user: &str,
    ) -> Result<String, GenerateError> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend.clone())
            .model(&self.settings.model)
            .system(system)
            .temperature(TEMPERATURE);

        if !self.settings.api_key.is_empty() {
            builder = builder.api_key(&self.settings.api_key);
        }

        let llm = builder
            .build()
            .map_err(|e| GenerateError::Build(e.to_string()))?;

        let mut messages: Vec<ChatMessage> = history
            .iter()
            .map(|turn| match turn.role {
                Role::User => ChatMessage::user().content(&turn.content).build(),
                Role::Assistant => ChatMessage::assistant().content(&turn.content).build(),
            })
            .collect();
        messages.push(ChatMessage::user().content(user).build());

        debug!(
            provider = self.settings.provider.as_str(),
            model = self.settings.model.as_str(),
            messages = messages.len();
            "Sending chat request"
        );

        let response = llm
            .chat(&messages)
            .await
            .map_err(|e| GenerateError::Chat(e.to_string()))?;

        match response.text() {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(GenerateError::EmptyResponse),
        }
    }
}
