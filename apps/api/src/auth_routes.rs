use crate::state::AppState;
use axum::{
    extract::{Json, State},
    response::{IntoResponse, Json as ResponseJson},
    routing::{get, post},
    Router,
};
use dm_error::Result;
use serde::Deserialize;
use serde_json::json;

/// 登录请求
#[derive(Deserialize)]
pub struct LoginRequestPayload {
    pub password: String,
}

/// 不需要令牌的认证路由
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

/// 需要令牌的认证路由
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/status", get(status))
}

/// 密码登录，成功返回 Bearer 令牌
async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequestPayload>,
) -> Result<impl IntoResponse> {
    let token = state.auth.login(&request.password)?;
    Ok(ResponseJson(json!({ "token": token })))
}

async fn logout(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.auth.logout()?;
    Ok(ResponseJson(json!({ "authenticated": false })))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    ResponseJson(json!({ "authenticated": state.auth.is_authenticated() }))
}
