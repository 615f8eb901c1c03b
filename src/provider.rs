use async_trait::async_trait;
use serde_json::Value;

use crate::prompt::PromptPart;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Request(String),
    #[error("Could not load image: {0}")]
    Media(String),
    #[error("Prompt was blocked by the provider: {0}")]
    Blocked(String),
    #[error("Provider returned no candidates")]
    EmptyResponse,
}

/// One prompt invocation, already rendered.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt_name: &'static str,
    pub parts: Vec<PromptPart>,
    pub output_schema: Value,
}

/// A hosted generative model that answers a rendered prompt with raw text.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerateRequest) -> Result<String, ProviderError>;
}
