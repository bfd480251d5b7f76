use crate::state::AppState;
use crate::{auth_routes, chat_routes, library_routes, queue_routes};
use axum::{extract::DefaultBodyLimit, response::Json, routing::get, Router};
use dm_auth::BearerAuthorizer;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// 一次上传请求最多携带的文件数
const MAX_FILES_PER_REQUEST: usize = 20;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .nest("/auth", auth_routes::protected_routes())
        .nest("/queue", queue_routes::routes())
        .nest("/records", library_routes::routes())
        .nest("/selection", library_routes::selection_routes())
        .nest("/chat", chat_routes::routes())
        .route_layer(BearerAuthorizer::layer(state.auth.clone()));

    let body_limit = state.max_upload_bytes.saturating_mul(MAX_FILES_PER_REQUEST);
    Router::new()
        .route("/api/v1/health", get(health))
        .nest("/api/v1/auth", auth_routes::public_routes())
        .nest("/api/v1", protected)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
