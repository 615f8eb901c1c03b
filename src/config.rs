use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderValue;
use url::Url;

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GOOGLE_GENAI_API_KEY (or GEMINI_API_KEY) must be set")]
    MissingApiKey,
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub bind: SocketAddr,
    pub max_body_bytes: usize,
    /// Empty means any origin.
    pub cors_origins: Vec<HeaderValue>,
    pub insecure_ssl: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = get("GOOGLE_GENAI_API_KEY")
            .or_else(|| get("GEMINI_API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;

        let bind_raw = get("TEXT_EXTRACTOR_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw.trim().parse().map_err(|e| ConfigError::Invalid {
            name: "TEXT_EXTRACTOR_BIND",
            reason: format!("{}: {}", bind_raw, e),
        })?;

        let max_body_bytes: usize = match get("TEXT_EXTRACTOR_MAX_BODY_BYTES") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid {
                name: "TEXT_EXTRACTOR_MAX_BODY_BYTES",
                reason: format!("{}: {}", raw, e),
            })?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        let cors_origins = match get("TEXT_EXTRACTOR_CORS_ORIGINS") {
            Some(raw) => parse_origins(&raw)?,
            None => Vec::new(),
        };

        Ok(Config {
            api_key,
            model: get("TEXT_EXTRACTOR_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: get("TEXT_EXTRACTOR_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            bind,
            max_body_bytes,
            cors_origins,
            insecure_ssl: get("TEXT_EXTRACTOR_INSECURE_SSL").as_deref() == Some("1"),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        })
    }
}

/// Comma-separated origins; a `*` entry allows any origin.
fn parse_origins(raw: &str) -> Result<Vec<HeaderValue>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "TEXT_EXTRACTOR_CORS_ORIGINS",
        reason,
    };

    let mut origins = Vec::new();
    for origin in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if origin == "*" {
            return Ok(Vec::new());
        }
        let url = Url::parse(origin).map_err(|e| invalid(format!("{}: {}", origin, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(invalid(format!("{}: expected http(s)://host[:port]", origin)));
        }
        // An origin has no path, so the trailing slash added by `Url` is dropped.
        let value = url.origin().ascii_serialization();
        let header = HeaderValue::from_str(&value).map_err(|e| invalid(format!("{}: {}", origin, e)))?;
        origins.push(header);
    }
    Ok(origins)
}
