use crate::state::AppState;
use axum::{
    extract::{Json, Path, State},
    response::{IntoResponse, Json as ResponseJson},
    routing::{get, post, put},
    Router,
};
use dm_chat::SendOutcome;
use dm_core::{render_citations, ChatSession, RenderedMessage};
use dm_error::{DmError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct SendRequest {
    pub question: String,
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionList {
    pub sessions: Vec<ChatSession>,
    pub active_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    #[serde(flatten)]
    pub outcome: SendOutcome,
    /// 仅在有回复时出现
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered: Option<RenderedMessage>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions).post(new_session))
        .route("/sessions/:id", put(rename_session).delete(delete_session))
        .route("/sessions/:id/select", post(select_session))
        .route("/send", post(send))
}

async fn list_sessions(State(state): State<AppState>) -> ResponseJson<SessionList> {
    ResponseJson(SessionList {
        sessions: state.chat.sessions().await.as_ref().clone(),
        active_id: state.chat.active_id().await,
    })
}

/// 进入草稿状态，第一条问题发送时才真正建会话
async fn new_session(State(state): State<AppState>) -> impl IntoResponse {
    state.chat.new_session().await;
    ResponseJson(json!({ "activeId": null }))
}

async fn select_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<ResponseJson<ChatSession>> {
    Ok(ResponseJson(state.chat.select(&id).await?))
}

async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<ResponseJson<ChatSession>> {
    Ok(ResponseJson(state.chat.rename(&id, &req.title).await?))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    state.chat.delete(&id).await?;
    Ok(ResponseJson(json!({ "deleted": id, "activeId": state.chat.active_id().await })))
}

async fn send(State(state): State<AppState>, Json(req): Json<SendRequest>) -> Result<ResponseJson<SendResponse>> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(DmError::invalid("question is empty"));
    }
    let records = state.library.read().await.snapshot();
    let outcome = state.chat.send(question, &records).await?;

    let rendered = outcome.reply().filter(|m| !m.is_error).map(|reply| {
        render_citations(&reply.content, |doc_id| {
            let id = Uuid::parse_str(doc_id).ok()?;
            records.iter().find(|r| r.id == id).map(|r| r.title.clone())
        })
    });
    Ok(ResponseJson(SendResponse { outcome, rendered }))
}
