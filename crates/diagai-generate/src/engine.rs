//! Text-generation backends and model selection.

use async_trait::async_trait;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use diagai_core::AiSettings;

/// One chat completion: a system template, the user's text and the
/// sampling parameters for a single attempt.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum TextGenError {
    #[error("backend: {0}")]
    Backend(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("empty completion")]
    Empty,
}

#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TextGenError>;
}

fn map_backend(provider: &str) -> Result<LLMBackend, TextGenError> {
    match provider {
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "google" => Ok(LLMBackend::Google),
        "ollama" => Ok(LLMBackend::Ollama),
        "groq" => Ok(LLMBackend::Groq),
        "mistral" => Ok(LLMBackend::Mistral),
        "deepseek" => Ok(LLMBackend::DeepSeek),
        other => Err(TextGenError::Backend(format!("unknown provider: {other}"))),
    }
}

/// Chat completions through the `llm` crate. A client is built per call
/// because the model changes between attempts.
pub struct LlmBackend {
    provider: String,
    api_key: String,
}

impl LlmBackend {
    pub fn new(settings: &AiSettings) -> Result<Self, TextGenError> {
        map_backend(&settings.provider)?;
        Ok(Self {
            provider: settings.provider.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl TextBackend for LlmBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TextGenError> {
        let backend = map_backend(&self.provider)?;

        let mut builder = LLMBuilder::new()
            .backend(backend)
            .model(&request.model)
            .system(&request.system)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .timeout_seconds(request.timeout.as_secs().max(1));

        if !self.api_key.is_empty() {
            builder = builder.api_key(&self.api_key);
        }

        let llm = builder
            .build()
            .map_err(|e| TextGenError::Backend(format!("build LLM: {e}")))?;

        let messages = vec![ChatMessage::user().content(&request.user).build()];

        let response = tokio::time::timeout(request.timeout, llm.chat(&messages))
            .await
            .map_err(|_| TextGenError::Timeout(request.timeout))?
            .map_err(|e| TextGenError::Backend(format!("chat: {e}")))?;

        match response.text() {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(TextGenError::Empty),
        }
    }
}

/// Chooses the model for each attempt.
pub trait ModelPicker: Send + Sync {
    fn pick(&self, pool: &[String]) -> Option<String>;
}

/// Uniform random choice, re-drawn on every attempt.
#[derive(Debug, Default)]
pub struct RandomModel;

impl ModelPicker for RandomModel {
    fn pick(&self, pool: &[String]) -> Option<String> {
        pool.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Always the first model in the pool.
#[derive(Debug, Default)]
pub struct FirstModel;

impl ModelPicker for FirstModel {
    fn pick(&self, pool: &[String]) -> Option<String> {
        pool.first().cloned()
    }
}

/// What the markup generator and frame sequencer share: a backend, a model
/// pool with its picker, and sampling settings.
#[derive(Clone)]
pub struct Prompter {
    backend: Arc<dyn TextBackend>,
    picker: Arc<dyn ModelPicker>,
    settings: AiSettings,
}

impl Prompter {
    pub fn new(
        backend: Arc<dyn TextBackend>,
        picker: Arc<dyn ModelPicker>,
        settings: AiSettings,
    ) -> Self {
        Self {
            backend,
            picker,
            settings,
        }
    }

    pub fn settings(&self) -> &AiSettings {
        &self.settings
    }

    /// One completion with a freshly picked model. Returns the model used
    /// alongside the outcome so callers can log it.
    pub async fn ask(
        &self,
        system: String,
        user: String,
        max_tokens: u32,
    ) -> (String, Result<String, TextGenError>) {
        let Some(model) = self.picker.pick(&self.settings.models) else {
            return (
                String::new(),
                Err(TextGenError::Backend("no models configured".to_string())),
            );
        };
        let timeout = self.settings.timeout();
        let request = CompletionRequest {
            system,
            user,
            model: model.clone(),
            temperature: self.settings.temperature,
            max_tokens,
            timeout,
        };
        let outcome = match tokio::time::timeout(timeout, self.backend.complete(&request)).await {
            Ok(Ok(text)) if text.trim().is_empty() => Err(TextGenError::Empty),
            Ok(result) => result,
            Err(_) => Err(TextGenError::Timeout(timeout)),
        };
        (model, outcome)
    }
}
