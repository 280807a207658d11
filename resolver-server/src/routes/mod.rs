use axum::extract::State;
use axum::http::Method;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod extract;
pub mod relay;

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub key: String,
    pub variant: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub providers: Vec<ProviderInfo>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers = state
        .registry
        .providers()
        .into_iter()
        .map(|(key, variant)| ProviderInfo {
            key: key.to_string(),
            variant,
        })
        .collect();
    Json(HealthResponse {
        status: "ok",
        providers,
    })
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/extract", get(extract::extract))
        .route("/segment", get(relay::segment))
        .route("/key", get(relay::key))
        .route("/subtitle", get(relay::subtitle))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
