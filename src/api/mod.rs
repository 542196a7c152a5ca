pub mod error;
pub mod handlers;

use crate::models::PolicyRegistry;
use crate::service::MatchingOrchestrator;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use error::{ApiError, ErrorResponse};

/// 共享状态：匹配服务与租户容差策略
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<MatchingOrchestrator>,
    pub policies: Arc<PolicyRegistry>,
}

/// 构建全部路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/matching", get(handlers::list_matches))
        .route("/matching/pending", get(handlers::pending))
        .route("/matching/export", get(handlers::export))
        .route("/matching/match", post(handlers::manual_match))
        .route("/matching/candidates", post(handlers::match_candidates))
        .route("/matching/batch", post(handlers::batch_match))
        .route("/matching/:id", get(handlers::get_match))
        .route("/matching/:id/resolve", post(handlers::resolve_match))
        .route("/matching/:id/unmatch", post(handlers::unmatch))
        .route("/matching/:id/rematch", post(handlers::rematch))
        .with_state(state)
}
