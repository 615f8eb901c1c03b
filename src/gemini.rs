use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::image_ref::{self, MediaSource};
use crate::prompt::PromptPart;
use crate::provider::{GenerateRequest, ModelProvider, ProviderError};

const USER_AGENT: &str = "text-extractor-api/0.1";
const FALLBACK_MIME: &str = "application/octet-stream";

// ── Provider ─────────────────────────────────────────────────────────────────

/// Gemini `generateContent` over REST.
pub struct GeminiProvider {
    client: reqwest::Client,
    media_client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
    max_image_bytes: usize,
}

impl GeminiProvider {
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let mut media_builder = reqwest::ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(USER_AGENT);
        if config.insecure_ssl {
            media_builder = media_builder.danger_accept_invalid_certs(true);
        }
        let media_client = media_builder
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Ok(Self {
            client,
            media_client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_base: config.api_base.clone(),
            max_image_bytes: config.max_body_bytes,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    async fn resolve_part(&self, part: &PromptPart) -> Result<Value, ProviderError> {
        match part {
            PromptPart::Text(text) => Ok(json!({ "text": text })),
            PromptPart::Media { url } => {
                let source =
                    image_ref::parse(url).map_err(|e| ProviderError::Media(e.to_string()))?;
                debug!(source = source.kind(), "resolving media part");
                let (mime_type, data) = match source {
                    MediaSource::Inline { mime_type, data } => (mime_type, data),
                    MediaSource::Remote(url) => self.download(url).await?,
                };
                Ok(json!({
                    "inlineData": { "mimeType": mime_type, "data": STANDARD.encode(data) }
                }))
            }
        }
    }

    async fn download(&self, url: url::Url) -> Result<(String, Vec<u8>), ProviderError> {
        debug!("downloading image from {}", url.host_str().unwrap_or(""));
        let mut response = self
            .media_client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Media(classify(&e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::Media(format!(
                "image URL returned {}",
                response.status().as_u16()
            )));
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_image_bytes as u64)
        {
            return Err(ProviderError::Media("image too large".to_string()));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        let mut data = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProviderError::Media(classify(&e)))?
        {
            if data.len() + chunk.len() > self.max_image_bytes {
                return Err(ProviderError::Media("image too large".to_string()));
            }
            data.extend_from_slice(&chunk);
        }

        Ok((mime_type, data))
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, ProviderError> {
        let mut parts = Vec::with_capacity(request.parts.len());
        for part in &request.parts {
            parts.push(self.resolve_part(part).await?);
        }
        let body = build_body(parts, &request.output_schema);

        debug!(prompt = request.prompt_name, model = %self.model, "calling generateContent");
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(classify(&e)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(classify(&e)))?;

        parse_response(status, &text)
    }
}

// ── Wire format ──────────────────────────────────────────────────────────────

pub fn build_body(parts: Vec<Value>, output_schema: &Value) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": output_schema,
        }
    })
}

pub fn parse_response(status: u16, body: &str) -> Result<String, ProviderError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if !(200..300).contains(&status) {
        let message = parsed
            .as_ref()
            .and_then(|v| v["error"]["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.trim().to_string());
        return Err(ProviderError::Status { status, message });
    }

    let value = parsed.ok_or_else(|| {
        ProviderError::Request("provider response was not valid JSON".to_string())
    })?;

    if let Some(reason) = value["promptFeedback"]["blockReason"].as_str() {
        return Err(ProviderError::Blocked(reason.to_string()));
    }

    let candidate = value["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or(ProviderError::EmptyResponse)?;

    let parts = candidate["content"]["parts"].as_array();
    let text: String = parts
        .into_iter()
        .flatten()
        .filter_map(|p| p["text"].as_str())
        .collect();

    if parts.is_none() {
        if let Some(reason) = candidate["finishReason"].as_str() {
            return Err(ProviderError::Blocked(reason.to_string()));
        }
        return Err(ProviderError::EmptyResponse);
    }

    Ok(text)
}

fn classify(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("TimeoutError: {}", e)
    } else if e.is_connect() {
        format!("ConnectError: {}", e)
    } else {
        format!("RequestError: {}", e)
    }
}
