use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

// ── Lazy static regexes ──────────────────────────────────────────────────────

/// `type/subtype`, both restricted to RFC 6838 name characters.
const MIME_PATTERN: &str = r"[a-zA-Z0-9!#$&^_.+-]+/[a-zA-Z0-9!#$&^_.+-]+";

static MIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!("^{}$", MIME_PATTERN)).unwrap());

/// `data:<mime>[;param=value]*;base64,<payload>`
static DATA_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?s)^data:({})((?:;[^;,]+)*);base64,(.*)$",
        MIME_PATTERN
    ))
    .unwrap()
});

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ImageRefError {
    #[error("Image reference is empty")]
    Empty,
    #[error("Malformed data URL: {0}")]
    MalformedDataUrl(String),
    #[error("Unsupported image reference scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),
}

// ── Resolved media ───────────────────────────────────────────────────────────

/// Where the bytes of an image reference live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Inline { mime_type: String, data: Vec<u8> },
    Remote(Url),
}

impl MediaSource {
    pub fn kind(&self) -> &'static str {
        match self {
            MediaSource::Inline { .. } => "data",
            MediaSource::Remote(_) => "remote",
        }
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

pub fn parse(reference: &str) -> Result<MediaSource, ImageRefError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(ImageRefError::Empty);
    }

    if reference
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
    {
        return parse_data_url(reference);
    }

    let url = Url::parse(reference).map_err(|e| ImageRefError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(MediaSource::Remote(url)),
        other => Err(ImageRefError::UnsupportedScheme(other.to_string())),
    }
}

/// Whether `mime_type` can sit in a data URL that [`parse`] accepts.
pub fn is_mime_type(mime_type: &str) -> bool {
    MIME_RE.is_match(mime_type)
}

/// Encode raw image bytes the way a browser `FileReader.readAsDataURL` does.
pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Short label for logs; never the full reference.
pub fn describe(reference: &str) -> String {
    let reference = reference.trim();
    if let Some(caps) = DATA_URL_RE.captures(reference) {
        return format!("data ({}, {} chars)", &caps[1], reference.len());
    }
    match Url::parse(reference) {
        Ok(url) => format!("{} ({})", url.scheme(), url.host_str().unwrap_or("")),
        Err(_) => format!("unrecognized ({} chars)", reference.len()),
    }
}

// ── Data URL decoding ────────────────────────────────────────────────────────

fn parse_data_url(reference: &str) -> Result<MediaSource, ImageRefError> {
    let caps = DATA_URL_RE.captures(reference).ok_or_else(|| {
        ImageRefError::MalformedDataUrl("expected data:<mime>;base64,<payload>".to_string())
    })?;

    let mime_type = caps[1].to_lowercase();
    // Browsers may wrap long payloads; whitespace is not part of the encoding.
    let payload: String = caps[3].chars().filter(|c| !c.is_whitespace()).collect();
    if payload.is_empty() {
        return Err(ImageRefError::MalformedDataUrl("empty payload".to_string()));
    }

    let data = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| ImageRefError::MalformedDataUrl(format!("invalid base64: {}", e)))?;

    Ok(MediaSource::Inline { mime_type, data })
}
