//! The HTTP entry point: POST /execute and GET /health.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use gptbridge_agent::{AgentExecution, PromptExecutor};
use gptbridge_core::{Config, Paths, PromptRequest};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

const SERVICE_NAME: &str = "ChatGPT Browser Agent API";

/// Fixed detail text when a run finishes without structured output.
pub(crate) const NO_OUTPUT_DETAIL: &str =
    "Agent execution failed to produce a structured output. Please try again.";

#[derive(Clone)]
struct AppState {
    executor: Arc<dyn PromptExecutor>,
}

pub async fn run(cli_host: Option<String>, cli_port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Arc::new(Config::load_or_default(&paths)?);

    let host = cli_host.unwrap_or_else(|| config.server.host.clone());
    let port = cli_port.unwrap_or(config.server.port);

    let executor: Arc<dyn PromptExecutor> = Arc::new(AgentExecution::new(config));
    let app = build_router(executor);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

fn build_router(executor: Arc<dyn PromptExecutor>) -> Router {
    let state = AppState { executor };
    Router::new()
        .route("/execute", post(handle_execute))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive().allow_credentials(false))
        .with_state(state)
}

async fn handle_execute(
    State(state): State<AppState>,
    Json(req): Json<PromptRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Err(e) = req.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "detail": e.to_string() })),
        );
    }

    info!(prompt_chars = req.prompt.chars().count(), "Executing prompt");

    match state.executor.execute(&req.prompt).await {
        Ok(Some(response)) => (
            StatusCode::OK,
            Json(serde_json::to_value(&response).unwrap_or(serde_json::Value::Null)),
        ),
        Ok(None) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": NO_OUTPUT_DETAIL })),
        ),
        Err(e) => {
            error!(error = %e, "Prompt execution failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "detail": format!("An error occurred during execution: {}", e)
                })),
            )
        }
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use gptbridge_core::models::MAX_PROMPT_CHARS;
    use gptbridge_core::{ChatGPTResponse, Error, Result, Source};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    enum MockBehavior {
        Success(ChatGPTResponse),
        NoOutput,
        Fail(String),
    }

    struct MockExecutor {
        behavior: MockBehavior,
        calls: AtomicUsize,
    }

    impl MockExecutor {
        fn new(behavior: MockBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PromptExecutor for MockExecutor {
        async fn execute(&self, _prompt: &str) -> Result<Option<ChatGPTResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                MockBehavior::Success(r) => Ok(Some(r.clone())),
                MockBehavior::NoOutput => Ok(None),
                MockBehavior::Fail(msg) => Err(Error::Other(msg.clone())),
            }
        }
    }

    async fn post_execute(app: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn test_health_fixed_payload() {
        let mock = MockExecutor::new(MockBehavior::NoOutput);
        let app = build_router(mock);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "ChatGPT Browser Agent API");
    }

    #[tokio::test]
    async fn test_execute_success_passes_sources_through() {
        let mock = MockExecutor::new(MockBehavior::Success(ChatGPTResponse {
            response: "Answer text".to_string(),
            sources: vec![
                Source { url: "https://a.example".to_string(), order: 1 },
                Source { url: "https://b.example".to_string(), order: 2 },
            ],
        }));
        let app = build_router(mock);

        let (status, json) = post_execute(app, serde_json::json!({"prompt": "hello"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["response"], "Answer text");
        assert_eq!(json["sources"][0]["url"], "https://a.example");
        assert_eq!(json["sources"][1]["order"], 2);
    }

    #[tokio::test]
    async fn test_execute_no_output_returns_fixed_detail() {
        let mock = MockExecutor::new(MockBehavior::NoOutput);
        let app = build_router(mock);

        let (status, json) = post_execute(app, serde_json::json!({"prompt": "hello"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["detail"], NO_OUTPUT_DETAIL);
    }

    #[tokio::test]
    async fn test_execute_error_embeds_message() {
        let mock = MockExecutor::new(MockBehavior::Fail("browser exploded".to_string()));
        let app = build_router(mock);

        let (status, json) = post_execute(app, serde_json::json!({"prompt": "hello"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let detail = json["detail"].as_str().unwrap();
        assert!(detail.starts_with("An error occurred during execution:"));
        assert!(detail.contains("browser exploded"));
    }

    #[tokio::test]
    async fn test_execute_empty_prompt_rejected_before_executor() {
        let mock = MockExecutor::new(MockBehavior::NoOutput);
        let app = build_router(mock.clone());

        let (status, json) = post_execute(app, serde_json::json!({"prompt": ""})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["detail"].as_str().unwrap().contains("must not be empty"));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_oversized_prompt_rejected_before_executor() {
        let mock = MockExecutor::new(MockBehavior::NoOutput);
        let app = build_router(mock.clone());

        let body = serde_json::json!({"prompt": "x".repeat(MAX_PROMPT_CHARS + 1)});
        let (status, json) = post_execute(app, body).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["detail"].as_str().unwrap().contains("maximum length"));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_boundary_length_reaches_executor() {
        let mock = MockExecutor::new(MockBehavior::NoOutput);
        let app = build_router(mock.clone());

        let body = serde_json::json!({"prompt": "x".repeat(MAX_PROMPT_CHARS)});
        let (status, _) = post_execute(app, body).await;
        // Validation passes; the mock yields no output, so the handler maps to 500
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }
}
