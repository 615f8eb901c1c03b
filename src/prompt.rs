use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

// ── Lazy static regexes ──────────────────────────────────────────────────────

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*(?:(media)\s+url\s*=\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap()
});

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n(.*?)\n?```$").unwrap());

// ── Prompt parts ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    Media { url: String },
}

// ── Template ─────────────────────────────────────────────────────────────────

/// A named prompt with handlebars-style placeholders.
///
/// `{{field}}` inlines a string field; `{{media url=field}}` splits the
/// prompt and emits the field as a media part.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub template: &'static str,
}

impl PromptTemplate {
    pub const fn new(name: &'static str, template: &'static str) -> Self {
        Self { name, template }
    }

    pub fn render(&self, input: &Value) -> Result<Vec<PromptPart>, String> {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut last = 0;

        for caps in PLACEHOLDER_RE.captures_iter(self.template) {
            let whole = caps.get(0).unwrap();
            text.push_str(&self.template[last..whole.start()]);
            last = whole.end();

            let field = &caps[2];
            let value = input
                .get(field)
                .and_then(Value::as_str)
                .ok_or_else(|| format!("prompt '{}' needs string field '{}'", self.name, field))?;

            if caps.get(1).is_some() {
                push_text(&mut parts, std::mem::take(&mut text));
                parts.push(PromptPart::Media {
                    url: value.to_string(),
                });
            } else {
                text.push_str(value);
            }
        }
        text.push_str(&self.template[last..]);
        push_text(&mut parts, text);

        Ok(parts)
    }
}

fn push_text(parts: &mut Vec<PromptPart>, text: String) {
    if !text.is_empty() {
        parts.push(PromptPart::Text(text));
    }
}

// ── Schema ───────────────────────────────────────────────────────────────────

/// A string field of an object schema.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

impl Field {
    pub const fn string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: true,
        }
    }
}

/// Flat object schema, checked against untrusted model output.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn object(fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// OpenAPI-subset schema as accepted by `generationConfig.responseSchema`.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.to_string(),
                json!({
                    "type": "STRING",
                    "description": field.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        json!({
            "type": "OBJECT",
            "properties": properties,
            "required": required,
        })
    }

    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("expected an object, got {}", json_kind(value)))?;

        for field in &self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required field '{}'", field.name));
                }
                None | Some(Value::Null) => {}
                Some(v) if !v.is_string() => {
                    return Err(format!(
                        "field '{}' must be a string, got {}",
                        field.name,
                        json_kind(v)
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Output parsing ───────────────────────────────────────────────────────────

/// Parse model text output as JSON, tolerating a surrounding Markdown fence.
pub fn parse_json_output(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    let body = CODE_FENCE_RE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    if body.is_empty() {
        return Err("model returned no output".to_string());
    }
    serde_json::from_str(body).map_err(|e| format!("model output is not valid JSON: {}", e))
}
