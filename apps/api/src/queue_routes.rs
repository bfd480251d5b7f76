use crate::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use dm_core::{UploadFile, UploadQueueItem};
use dm_error::{DmError, Result};
use dm_queue::{EnqueueOutcome, QueueCommand};
use serde_json::json;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_queue).post(upload))
        .route("/clear", post(clear_finished))
        .route("/:id", axum::routing::delete(remove_item))
        .route("/:id/pause", post(pause_item))
        .route("/:id/resume", post(resume_item))
        .route("/:id/toggle", post(toggle_item))
        .route("/:id/preview", get(preview))
}

/// 多个 `file` 字段一次入队；超过大小上限的文件计入 rejected
async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<EnqueueOutcome>> {
    let mut files = Vec::new();
    let mut oversized = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DmError::invalid(format!("multipart: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "upload.bin".into());
        let mime_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        let data = field
            .bytes()
            .await
            .map_err(|e| DmError::invalid(format!("multipart: {}", e)))?;
        if data.len() > state.max_upload_bytes {
            tracing::warn!(file_name = %file_name, size = data.len(), "upload exceeds size limit");
            oversized.push(file_name);
            continue;
        }
        files.push(UploadFile::from_bytes(file_name, mime_type, data));
    }
    if files.is_empty() && oversized.is_empty() {
        return Err(DmError::invalid("no file field in upload"));
    }
    let mut outcome = state.queue().enqueue(files).await;
    outcome.rejected.extend(oversized);
    Ok(Json(outcome))
}

async fn list_queue(State(state): State<AppState>) -> Json<Vec<UploadQueueItem>> {
    Json(state.queue().snapshot().await.items().to_vec())
}

async fn ensure_item(state: &AppState, id: Uuid) -> Result<()> {
    if state.queue().contains(id).await {
        Ok(())
    } else {
        Err(DmError::not_found(format!("queue item {}", id)))
    }
}

async fn apply_and_get(state: &AppState, id: Uuid, cmd: QueueCommand) -> Result<Json<UploadQueueItem>> {
    ensure_item(state, id).await?;
    let snapshot = state.queue().dispatch(cmd).await;
    snapshot
        .get(id)
        .cloned()
        .map(Json)
        .ok_or_else(|| DmError::not_found(format!("queue item {}", id)))
}

async fn pause_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<UploadQueueItem>> {
    apply_and_get(&state, id, QueueCommand::Pause(id)).await
}

async fn resume_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<UploadQueueItem>> {
    apply_and_get(&state, id, QueueCommand::Resume(id)).await
}

async fn toggle_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<UploadQueueItem>> {
    apply_and_get(&state, id, QueueCommand::TogglePause(id)).await
}

/// 任何状态都可移除；处理中的条目在下一个检查点放弃
async fn remove_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    ensure_item(&state, id).await?;
    state.queue().dispatch(QueueCommand::Remove(id)).await;
    Ok(Json(json!({ "removed": id })))
}

async fn clear_finished(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.queue().dispatch(QueueCommand::ClearFinished).await;
    Json(json!({ "remaining": snapshot.len() }))
}

async fn preview(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    let (mime_type, bytes) = state.queue().preview(id).await?;
    Ok(([(header::CONTENT_TYPE, mime_type)], bytes))
}
