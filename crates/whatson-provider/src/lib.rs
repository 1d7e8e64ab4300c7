pub mod openai;

use async_trait::async_trait;

pub use openai::OpenAiChatProvider;

/// One generation call: a system prompt carrying the retrieved context and
/// the user's message.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub user_text: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user_text: user_text.into(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 512,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Generation failures are recoverable: the orchestrator falls back to a
/// deterministic summary instead of surfacing them.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("provider returned an empty completion")]
    Empty,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError>;
}

/// Echoes the user text back. Lets the pipeline run end to end without any
/// network dependency.
pub struct StubProvider;

#[async_trait]
impl GenerationProvider for StubProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        Ok(format!(
            "[stub:{}] {} [finish]",
            request.model, request.user_text
        ))
    }
}

/// Always fails. Exercises the deterministic fallback path in tests.
pub struct FailingProvider;

#[async_trait]
impl GenerationProvider for FailingProvider {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, ProviderError> {
        Err(ProviderError::Empty)
    }
}
