use serde_json::Value;
use tracing::{info, warn};

use crate::image_ref;
use crate::models::{ExtractTextFromImageInput, ExtractTextFromImageOutput};
use crate::prompt::{self, Field, PromptTemplate, Schema};
use crate::provider::{GenerateRequest, ModelProvider, ProviderError};

// ── Prompt ───────────────────────────────────────────────────────────────────

pub const EXTRACT_TEXT_PROMPT: PromptTemplate = PromptTemplate::new(
    "extractTextPrompt",
    "Extract the text from the following image. Return only the raw text.\n\nImage: {{media url=imageUrl}}",
);

const IMAGE_URL_FIELD: Field =
    Field::string("imageUrl", "The URL of the image to extract text from.");
const EXTRACTED_TEXT_FIELD: Field =
    Field::string("extractedText", "The extracted text from the image.");

pub fn input_schema() -> Schema {
    Schema::object([IMAGE_URL_FIELD])
}

pub fn output_schema() -> Schema {
    Schema::object([EXTRACTED_TEXT_FIELD])
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("No image supplied")]
    InputMissing,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Provider(String),
    #[error("Model output did not match the expected schema: {0}")]
    SchemaViolation(String),
}

impl From<ProviderError> for ExtractionError {
    fn from(e: ProviderError) -> Self {
        ExtractionError::Provider(e.to_string())
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Ask the model for the text in one image. Single attempt, no retry.
pub async fn extract_text_from_image(
    provider: &dyn ModelProvider,
    input: &ExtractTextFromImageInput,
) -> Result<ExtractTextFromImageOutput, ExtractionError> {
    if input.image_url.trim().is_empty() {
        return Err(ExtractionError::InputMissing);
    }

    let bound = serde_json::to_value(input)
        .map_err(|e| ExtractionError::InvalidInput(format!("could not bind prompt input: {}", e)))?;
    let parts = bind_prompt(&EXTRACT_TEXT_PROMPT, &input_schema(), &bound)?;

    info!(
        provider = provider.name(),
        image = %image_ref::describe(&input.image_url),
        "extracting text"
    );

    let request = GenerateRequest {
        prompt_name: EXTRACT_TEXT_PROMPT.name,
        parts,
        output_schema: output_schema().to_json_schema(),
    };
    let raw = match provider.generate(request).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(provider = provider.name(), error = %e, "text extraction failed");
            return Err(e.into());
        }
    };

    let output = decode_output(&raw).inspect_err(|e| {
        warn!(provider = provider.name(), error = %e, "model output rejected");
    })?;
    info!(chars = output.extracted_text.chars().count(), "text extracted");
    Ok(output)
}

fn bind_prompt(
    template: &PromptTemplate,
    schema: &Schema,
    input: &Value,
) -> Result<Vec<prompt::PromptPart>, ExtractionError> {
    schema.validate(input).map_err(ExtractionError::InvalidInput)?;
    template.render(input).map_err(ExtractionError::InvalidInput)
}

// ── Output validation ────────────────────────────────────────────────────────

fn decode_output(raw: &str) -> Result<ExtractTextFromImageOutput, ExtractionError> {
    let value: Value = prompt::parse_json_output(raw).map_err(ExtractionError::SchemaViolation)?;
    output_schema()
        .validate(&value)
        .map_err(ExtractionError::SchemaViolation)?;
    serde_json::from_value(value).map_err(|e| ExtractionError::SchemaViolation(e.to_string()))
}
