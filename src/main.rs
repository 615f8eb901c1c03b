use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

mod config;
mod extract;
mod gemini;
mod image_ref;
mod models;
mod prompt;
mod provider;

use config::Config;
use extract::ExtractionError;
use models::ExtractTextFromImageInput;
use provider::ModelProvider;

#[derive(Clone)]
struct AppState {
    provider: Arc<dyn ModelProvider>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let provider = gemini::GeminiProvider::new(&config)?;
    let app = app(Arc::new(provider), &config);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(
        "listening on {} (model {})",
        listener.local_addr()?,
        config.model
    );
    axum::serve(listener, app).await?;
    Ok(())
}

fn app(provider: Arc<dyn ModelProvider>, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract", post(extract_endpoint))
        .route("/extract/upload", post(upload_endpoint))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors_layer(&config.cors_origins))
        .with_state(AppState { provider })
}

fn cors_layer(origins: &[HeaderValue]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    layer.allow_origin(origins.to_vec())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn extract_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ExtractTextFromImageInput>,
) -> Response {
    run_extraction(&state, req).await
}

/// Raw image bytes in the body; encoded as a data URL like a browser upload.
async fn upload_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_lowercase())
        .unwrap_or_default();

    if !mime_type.starts_with("image/") || !image_ref::is_mime_type(&mime_type) {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(json!({"detail": "Content-Type must be an image type"})),
        )
            .into_response();
    }

    let image_url = if body.is_empty() {
        String::new()
    } else {
        image_ref::to_data_url(&mime_type, &body)
    };
    run_extraction(&state, ExtractTextFromImageInput { image_url }).await
}

async fn run_extraction(state: &AppState, req: ExtractTextFromImageInput) -> Response {
    match extract::extract_text_from_image(state.provider.as_ref(), &req).await {
        Ok(output) => (StatusCode::OK, Json(output)).into_response(),
        Err(e) => (status_for(&e), Json(json!({"detail": e.to_string()}))).into_response(),
    }
}

fn status_for(e: &ExtractionError) -> StatusCode {
    match e {
        ExtractionError::InputMissing => StatusCode::BAD_REQUEST,
        ExtractionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ExtractionError::Provider(_) => StatusCode::BAD_GATEWAY,
        ExtractionError::SchemaViolation(_) => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use crate::prompt::PromptPart;
    use crate::provider::{GenerateRequest, ProviderError};
    use serde_json::Value;
    use tower::ServiceExt;

    struct FixedProvider(Result<&'static str, &'static str>);

    #[async_trait]
    impl ModelProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, request: GenerateRequest) -> Result<String, ProviderError> {
            // Echo the media part so upload tests can see the data URL.
            if let Some(PromptPart::Media { url }) = request.parts.last() {
                if url.starts_with("data:image/jpeg") {
                    return Ok(json!({ "extractedText": url }).to_string());
                }
            }
            self.0
                .map(str::to_string)
                .map_err(|m| ProviderError::Status {
                    status: 429,
                    message: m.to_string(),
                })
        }
    }

    fn test_app(reply: Result<&'static str, &'static str>) -> Router {
        let config = Config::from_lookup(|name| match name {
            "GEMINI_API_KEY" => Some("k".to_string()),
            "TEXT_EXTRACTOR_MAX_BODY_BYTES" => Some("4096".to_string()),
            _ => None,
        })
        .unwrap();
        app(Arc::new(FixedProvider(reply)), &config)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn json_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/extract")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(test_app(Ok("{}")), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn extract_returns_text() {
        let app = test_app(Ok(r#"{"extractedText":"Hello World"}"#));
        let (status, body) = send(
            app,
            json_request(json!({"imageUrl": "data:image/png;base64,AAAA"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"extractedText": "Hello World"}));
    }

    #[tokio::test]
    async fn empty_or_missing_image_is_bad_request() {
        for payload in [json!({"imageUrl": ""}), json!({})] {
            let app = test_app(Ok(r#"{"extractedText":"x"}"#));
            let (status, body) = send(app, json_request(payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["detail"], "No image supplied");
        }
    }

    #[tokio::test]
    async fn provider_failure_is_bad_gateway() {
        let app = test_app(Err("rate limited"));
        let (status, body) = send(
            app,
            json_request(json!({"imageUrl": "data:image/png;base64,AAAA"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["detail"].as_str().unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn schema_violation_is_bad_gateway() {
        let app = test_app(Ok(r#"{"text":"Hello World"}"#));
        let (status, body) = send(
            app,
            json_request(json!({"imageUrl": "data:image/png;base64,AAAA"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["detail"].as_str().unwrap().contains("schema"));
    }

    #[tokio::test]
    async fn upload_is_sent_as_data_url() {
        let request = Request::builder()
            .method("POST")
            .uri("/extract/upload")
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(Body::from(vec![0xFFu8, 0xD8, 0xFF]))
            .unwrap();
        let (status, body) = send(test_app(Ok("{}")), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["extractedText"], "data:image/jpeg;base64,/9j/");
    }

    #[tokio::test]
    async fn upload_requires_image_content_type() {
        let request = Request::builder()
            .method("POST")
            .uri("/extract/upload")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let (status, _) = send(test_app(Ok("{}")), request).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn empty_upload_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/extract/upload")
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(test_app(Ok("{}")), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/extract/upload")
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(vec![0u8; 8192]))
            .unwrap();
        let (status, _) = send(test_app(Ok("{}")), request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn malformed_image_content_type_is_unsupported() {
        for content_type in ["image/png,x", "image/", "image/p ng"] {
            let request = Request::builder()
                .method("POST")
                .uri("/extract/upload")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(vec![0x89u8, 0x50, 0x4E, 0x47]))
                .unwrap();
            let (status, _) = send(test_app(Ok(r#"{"extractedText":"x"}"#)), request).await;
            assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE, "{}", content_type);
        }
    }

    #[test]
    fn local_input_errors_are_client_errors() {
        assert_eq!(
            status_for(&ExtractionError::InvalidInput("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&ExtractionError::InputMissing), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&ExtractionError::SchemaViolation("x".to_string())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn configured_origin_gets_cors_headers() {
        let config = Config::from_lookup(|name| match name {
            "GEMINI_API_KEY" => Some("k".to_string()),
            "TEXT_EXTRACTOR_CORS_ORIGINS" => Some("https://app.example.com".to_string()),
            _ => None,
        })
        .unwrap();
        let app = app(Arc::new(FixedProvider(Ok("{}"))), &config);
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
    }

    #[tokio::test]
    async fn wildcard_origin_allows_any_origin() {
        let config = Config::from_lookup(|name| match name {
            "GEMINI_API_KEY" => Some("k".to_string()),
            "TEXT_EXTRACTOR_CORS_ORIGINS" => Some("*".to_string()),
            _ => None,
        })
        .unwrap();
        let app = app(Arc::new(FixedProvider(Ok("{}"))), &config);
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "https://anywhere.example.org")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
