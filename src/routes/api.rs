use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::docs::ApiDoc;
use crate::handlers::{execute, health_check};
use crate::websocket::handler::websocket_handler;
use crate::AppState;

/// Create all routes. Paths not claimed by the control plane upgrade to a
/// room socket.
pub fn create_routes(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config);
    Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/execute", post(execute))
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(websocket_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let Some(origins) = config.cors_origins.as_deref() else {
        return CorsLayer::permissive();
    };
    let origins: Vec<HeaderValue> = origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
