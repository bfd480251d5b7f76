use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use dm_core::{filter_records, DocRecord};
use dm_error::{DmError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize, Default)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionView {
    pub active: bool,
    pub ids: Vec<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_records))
        .route("/reload", post(reload))
        .route("/:id", get(get_record).delete(delete_record))
}

pub fn selection_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_selection))
        .route("/mode", post(toggle_mode))
        .route("/all", post(select_all))
        .route("/export", post(export_selected))
        .route("/:id", post(toggle_record))
}

/// `?q=` 为空时返回全部
async fn list_records(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<DocRecord>> {
    Json(state.library.read().await.search(&params.q))
}

async fn get_record(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<DocRecord>> {
    let lib = state.library.read().await;
    lib.get(id)
        .cloned()
        .map(Json)
        .ok_or_else(|| DmError::not_found(format!("record {}", id)))
}

/// 远端删除成功后才移出本地缓存
async fn delete_record(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    state.records.delete(id).await?;
    {
        let mut lib = state.library.write().await;
        *lib = lib.without(id);
    }
    state.selection.write().await.remove(id);
    tracing::info!(record_id = %id, "record deleted");
    Ok(Json(json!({ "deleted": id })))
}

async fn reload(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let records = state.records.list().await?;
    let count = records.len();
    *state.library.write().await = dm_core::Library::new(records);
    Ok(Json(json!({ "count": count })))
}

async fn selection_view(state: &AppState) -> SelectionView {
    let sel = state.selection.read().await;
    SelectionView {
        active: sel.is_active(),
        ids: sel.ids().iter().copied().collect(),
    }
}

async fn get_selection(State(state): State<AppState>) -> Json<SelectionView> {
    Json(selection_view(&state).await)
}

async fn toggle_mode(State(state): State<AppState>) -> Json<SelectionView> {
    state.selection.write().await.toggle_mode();
    Json(selection_view(&state).await)
}

async fn toggle_record(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SelectionView>> {
    if state.library.read().await.get(id).is_none() {
        return Err(DmError::not_found(format!("record {}", id)));
    }
    state.selection.write().await.toggle(id);
    Ok(Json(selection_view(&state).await))
}

/// 作用于当前过滤结果
async fn select_all(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<SelectionView> {
    let records = state.library.read().await.snapshot();
    let filtered = filter_records(&records, &params.q);
    state.selection.write().await.select_all(&filtered);
    Json(selection_view(&state).await)
}

async fn export_selected(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let records = state.library.read().await.snapshot();
    let selected = state.selection.read().await.selected_records(&records);
    let archive = dm_export::export_records(&selected, chrono::Local::now().date_naive())?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    let disposition = format!("attachment; filename=\"{}\"", archive.file_name);
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).map_err(|e| DmError::invalid(e.to_string()))?,
    );
    headers.insert(
        "x-export-failures",
        HeaderValue::from_str(&archive.failures.len().to_string())
            .map_err(|e| DmError::invalid(e.to_string()))?,
    );
    Ok((headers, archive.bytes))
}
