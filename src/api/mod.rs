use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use validator::Validate;

use crate::orchestrator::QueryOrchestrator;
use crate::types::QueryRequest;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<QueryOrchestrator>,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    model: String,
    backend: String,
    embedding: String,
}

/// Thin HTTP surface over the engine. The pipeline itself is callable
/// as a library; this router only does auth, validation and error
/// mapping.
pub fn create_api(orchestrator: Arc<QueryOrchestrator>, api_token: Option<String>) -> Router {
    let state = AppState {
        orchestrator,
        api_token,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/query", post(query_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Response {
    if let Some(expected) = &state.api_token {
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing bearer token".into(),
                    kind: "unauthorized".into(),
                }),
            )
                .into_response();
        }
    }

    if let Err(e) = request.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: e.to_string(),
                kind: "validation_error".into(),
            }),
        )
            .into_response();
    }

    log::info!(
        "Query request: {} questions against {}",
        request.questions.len(),
        request.documents
    );

    match state.orchestrator.run(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            log::error!("Request failed: {}", e);
            let status = if e.is_document_stage() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                    kind: e.kind().to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Per-component status: the overall service is up, but a degraded
/// embedding layer is worth surfacing to monitoring.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let orchestrator = &state.orchestrator;
    let embedding = if orchestrator.embedding_degraded() {
        "degraded"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: "ok".into(),
        model: orchestrator.model_info(),
        backend: format!("{:?}", orchestrator.index_backend()),
        embedding: embedding.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::embedding::EmbeddingService;
    use crate::error::EngineError;
    use crate::providers::CompletionProvider;
    use async_trait::async_trait;

    struct StubProvider;

    #[async_trait]
    impl CompletionProvider for StubProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, EngineError> {
            Ok("{\"answer\": \"ok\"}".into())
        }

        fn model_info(&self) -> String {
            "stub".into()
        }
    }

    #[tokio::test]
    async fn health_reports_component_status() {
        let orchestrator = Arc::new(
            QueryOrchestrator::new(
                EngineConfig::default(),
                Arc::new(EmbeddingService::new(None)),
                Arc::new(StubProvider),
            )
            .unwrap(),
        );
        let state = AppState {
            orchestrator,
            api_token: None,
        };

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.model, "stub");
        assert_eq!(health.backend, "InMemory");
        assert_eq!(health.embedding, "degraded");
    }
}
