use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use crate::common::response::ApiResponse;
use crate::docs::ApiDoc;
use axum::{Json, Router, extract::State};
use serde::Serialize;
use crate::state::AppState;

use tower_http::cors::{Any, CorsLayer};

pub fn configure_routes() -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes())
        .nest("/api/v1/jobs", crate::modules::jobs::router())
        .layer(cors)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", axum::routing::get(health))
}

/// Which backends this process was started with.
#[derive(Serialize)]
struct HealthInfo {
    store: &'static str,
    synthesizer: &'static str,
    publisher: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthInfo>> {
    let config = &state.config;
    let info = HealthInfo {
        store: if config.database_url.is_some() { "postgres" } else { "memory" },
        synthesizer: if config.speech.is_some() { "elevenlabs" } else { "silent" },
        publisher: if config.storage.is_some() { "s3" } else { "local" },
    };

    Json(ApiResponse::success(info, "ok"))
}

#[cfg(test)]
mod tests {
    use crate::app::create_app;
    use crate::config::settings::AppConfig;
    use crate::modules::jobs::MemoryJobStore;
    use crate::state::AppState;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_and_openapi_are_served() {
        let state = AppState::new(
            AppConfig::for_tests("/tmp/vidsnap-test"),
            Arc::new(MemoryJobStore::new()),
        );
        let app = create_app(state);

        let health = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        let bytes = to_bytes(health.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["store"], "memory");
        assert_eq!(body["data"]["synthesizer"], "silent");
        assert_eq!(body["data"]["publisher"], "local");

        let docs = app
            .oneshot(Request::builder().uri("/api-docs/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(docs.status(), StatusCode::OK);
        let bytes = to_bytes(docs.into_body(), usize::MAX).await.unwrap();
        let spec: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(spec["paths"]["/api/v1/jobs"].is_object());
        assert!(spec["paths"]["/api/v1/jobs/{id}"].is_object());
    }
}
