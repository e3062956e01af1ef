mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::error::AppError;
pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health_handler,
        api::search_handler,
        api::explain_handler,
        api::add_image_handler,
        api::save_handler,
        api::stats_handler,
        api::metrics_handler,
    ),
    components(schemas(
        types::SearchForm,
        types::AddImageForm,
        types::ExplainRequest,
        types::AddImageResponse,
        types::HealthResponse,
        types::StatsResponse,
        crate::service::SearchResult,
        crate::service::ExplainResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route("/search", post(api::search_handler))
        .route("/explain", post(api::explain_handler))
        .route("/add", post(api::add_image_handler))
        .route("/save", post(api::save_handler))
        .route("/stats", get(api::stats_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
