use crate::PipelineEvent;
use bytes::Bytes;
use dm_core::{FileSource, ProcessingStatus, UploadFile, UploadQueueItem};
use dm_error::{DmError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub const PREVIEW_SCHEME: &str = "preview://";
pub const PROCESSING_FAILED: &str = "Processing failed";

/// 队列变更指令，全部经 `UploadQueue::apply` 归约
#[derive(Debug, Clone)]
pub enum QueueCommand {
    Enqueue(Vec<UploadQueueItem>),
    TogglePause(Uuid),
    Pause(Uuid),
    Resume(Uuid),
    Remove(Uuid),
    MarkProcessing(Uuid),
    MarkCompleted(Uuid),
    MarkError { id: Uuid, message: String },
    ClearFinished,
}

/// 不可变队列快照；每次变更产出新值
#[derive(Debug, Clone, Default)]
pub struct UploadQueue {
    items: Vec<UploadQueueItem>,
}

pub fn pending_item(file: UploadFile) -> UploadQueueItem {
    let id = Uuid::new_v4();
    UploadQueueItem {
        id,
        file,
        preview_url: format!("{}{}", PREVIEW_SCHEME, id),
        status: ProcessingStatus::Pending,
        error: None,
    }
}

impl UploadQueue {
    pub fn items(&self) -> &[UploadQueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&UploadQueueItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// 从队首起第一个 PENDING，PAUSED 原位跳过
    pub fn next_pending(&self) -> Option<&UploadQueueItem> {
        self.items
            .iter()
            .find(|i| i.status == ProcessingStatus::Pending)
    }

    pub fn count(&self, status: ProcessingStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    pub fn has_pending(&self) -> bool {
        self.count(ProcessingStatus::Pending) > 0
    }

    pub fn apply(&self, cmd: QueueCommand) -> UploadQueue {
        let mut items = self.items.clone();
        match cmd {
            QueueCommand::Enqueue(new_items) => items.extend(new_items),
            QueueCommand::TogglePause(id) => {
                if let Some(item) = items.iter_mut().find(|i| i.id == id) {
                    item.status = match item.status {
                        ProcessingStatus::Pending => ProcessingStatus::Paused,
                        ProcessingStatus::Paused => ProcessingStatus::Pending,
                        other => other,
                    };
                }
            }
            QueueCommand::Pause(id) => {
                set_status_if(&mut items, id, ProcessingStatus::Pending, ProcessingStatus::Paused)
            }
            QueueCommand::Resume(id) => {
                set_status_if(&mut items, id, ProcessingStatus::Paused, ProcessingStatus::Pending)
            }
            QueueCommand::Remove(id) => items.retain(|i| i.id != id),
            QueueCommand::MarkProcessing(id) => set_status_if(
                &mut items,
                id,
                ProcessingStatus::Pending,
                ProcessingStatus::Processing,
            ),
            QueueCommand::MarkCompleted(id) => set_status_if(
                &mut items,
                id,
                ProcessingStatus::Processing,
                ProcessingStatus::Completed,
            ),
            QueueCommand::MarkError { id, message } => {
                set_status(&mut items, id, ProcessingStatus::Error, Some(message))
            }
            QueueCommand::ClearFinished => {
                items.retain(|i| i.status != ProcessingStatus::Completed)
            }
        }
        UploadQueue { items }
    }
}

fn set_status(
    items: &mut [UploadQueueItem],
    id: Uuid,
    status: ProcessingStatus,
    error: Option<String>,
) {
    // 已移除的条目不复活
    if let Some(item) = items.iter_mut().find(|i| i.id == id) {
        item.status = status;
        item.error = error;
    }
}

fn set_status_if(
    items: &mut [UploadQueueItem],
    id: Uuid,
    from: ProcessingStatus,
    to: ProcessingStatus,
) {
    if let Some(item) = items.iter_mut().find(|i| i.id == id && i.status == from) {
        item.status = to;
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EnqueueOutcome {
    pub accepted: Vec<Uuid>,
    /// 非图片文件名
    pub rejected: Vec<String>,
}

/// 队列状态容器：整体替换，读者只拿快照
#[derive(Clone)]
pub struct QueueStore {
    state: Arc<RwLock<Arc<UploadQueue>>>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl QueueStore {
    pub fn new(events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self {
            state: Arc::new(RwLock::new(Arc::new(UploadQueue::default()))),
            events,
        }
    }

    pub async fn snapshot(&self) -> Arc<UploadQueue> {
        self.state.read().await.clone()
    }

    pub async fn dispatch(&self, cmd: QueueCommand) -> Arc<UploadQueue> {
        let next = {
            let mut state = self.state.write().await;
            let next = Arc::new(state.apply(cmd));
            *state = next.clone();
            next
        };
        let _ = self.events.send(PipelineEvent::QueueChanged);
        next
    }

    /// 非 image/* 的文件直接拒收
    pub async fn enqueue(&self, files: Vec<UploadFile>) -> EnqueueOutcome {
        let mut outcome = EnqueueOutcome::default();
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            if !file.is_image() {
                tracing::warn!(file_name = %file.file_name, mime_type = %file.mime_type, "rejected non-image upload");
                outcome.rejected.push(file.file_name);
                continue;
            }
            let item = pending_item(file);
            outcome.accepted.push(item.id);
            items.push(item);
        }
        if !items.is_empty() {
            tracing::info!(count = items.len(), "files enqueued");
            self.dispatch(QueueCommand::Enqueue(items)).await;
        }
        outcome
    }

    /// 在写锁内应用指令，并返回条目状态是否真的变成了 `to`
    async fn transition(&self, id: Uuid, cmd: QueueCommand, to: ProcessingStatus) -> bool {
        let changed = {
            let mut state = self.state.write().await;
            let before = state.get(id).map(|i| i.status);
            let next = state.apply(cmd);
            let changed = before != Some(to) && next.get(id).map(|i| i.status) == Some(to);
            if changed {
                *state = Arc::new(next);
            }
            changed
        };
        if changed {
            let _ = self.events.send(PipelineEvent::QueueChanged);
        }
        changed
    }

    /// PENDING -> PROCESSING；条目已暂停或被移除时返回 false
    pub async fn mark_processing(&self, id: Uuid) -> bool {
        self.transition(id, QueueCommand::MarkProcessing(id), ProcessingStatus::Processing)
            .await
    }

    /// PROCESSING -> COMPLETED；条目已被移除时返回 false
    pub async fn mark_completed(&self, id: Uuid) -> bool {
        self.transition(id, QueueCommand::MarkCompleted(id), ProcessingStatus::Completed)
            .await
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.snapshot().await.get(id).is_some()
    }

    pub async fn status(&self, id: Uuid) -> Option<ProcessingStatus> {
        self.snapshot().await.get(id).map(|i| i.status)
    }

    /// 预览图原始内容
    pub async fn preview(&self, id: Uuid) -> Result<(String, Bytes)> {
        let item = self
            .snapshot()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DmError::not_found(format!("queue item {}", id)))?;
        let bytes = read_source(&item.file.source).await?;
        Ok((item.file.mime_type, bytes))
    }
}

pub(crate) async fn read_source(source: &FileSource) -> Result<Bytes> {
    match source {
        FileSource::Bytes(b) => Ok(b.clone()),
        FileSource::Path(p) => tokio::fs::read(p).await.map(Bytes::from).map_err(|e| DmError::Io {
            path: p.display().to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> UploadFile {
        UploadFile::from_bytes(name, "image/png", Bytes::from_static(b"png"))
    }

    fn queue_of(names: &[&str]) -> (UploadQueue, Vec<Uuid>) {
        let items: Vec<UploadQueueItem> = names.iter().map(|n| pending_item(file(n))).collect();
        let ids = items.iter().map(|i| i.id).collect();
        (UploadQueue::default().apply(QueueCommand::Enqueue(items)), ids)
    }

    #[test]
    fn test_enqueue_appends_pending_with_preview() {
        let (q, ids) = queue_of(&["a.png", "b.png"]);
        assert_eq!(q.len(), 2);
        assert_eq!(q.items()[0].id, ids[0]);
        assert_eq!(q.items()[1].preview_url, format!("preview://{}", ids[1]));
        assert!(q.items().iter().all(|i| i.status == ProcessingStatus::Pending));
    }

    #[test]
    fn test_pause_skips_in_place() {
        let (q, ids) = queue_of(&["a.png", "b.png", "c.png"]);
        let q = q.apply(QueueCommand::Pause(ids[0]));
        assert_eq!(q.next_pending().map(|i| i.id), Some(ids[1]));
        assert_eq!(q.items()[0].status, ProcessingStatus::Paused);
        let q = q.apply(QueueCommand::TogglePause(ids[0]));
        assert_eq!(q.next_pending().map(|i| i.id), Some(ids[0]));
    }

    #[test]
    fn test_pause_resume_only_from_matching_state() {
        let (q, ids) = queue_of(&["a.png"]);
        let q = q.apply(QueueCommand::MarkProcessing(ids[0]));
        let q = q.apply(QueueCommand::Pause(ids[0]));
        assert_eq!(q.items()[0].status, ProcessingStatus::Processing);
        let q = q.apply(QueueCommand::TogglePause(ids[0]));
        assert_eq!(q.items()[0].status, ProcessingStatus::Processing);
        let q = q.apply(QueueCommand::Resume(ids[0]));
        assert_eq!(q.items()[0].status, ProcessingStatus::Processing);
    }

    #[test]
    fn test_mark_on_removed_item_is_noop() {
        let (q, ids) = queue_of(&["a.png", "b.png"]);
        let q = q.apply(QueueCommand::Remove(ids[0]));
        let q = q.apply(QueueCommand::MarkError {
            id: ids[0],
            message: PROCESSING_FAILED.into(),
        });
        assert_eq!(q.len(), 1);
        assert!(q.get(ids[0]).is_none());
    }

    #[test]
    fn test_mark_processing_keeps_user_pause() {
        let (q, ids) = queue_of(&["a.png"]);
        let q = q
            .apply(QueueCommand::Pause(ids[0]))
            .apply(QueueCommand::MarkProcessing(ids[0]))
            .apply(QueueCommand::MarkCompleted(ids[0]));
        assert_eq!(q.items()[0].status, ProcessingStatus::Paused);
    }

    #[test]
    fn test_clear_finished_keeps_errors() {
        let (q, ids) = queue_of(&["a.png", "b.png", "c.png"]);
        let q = q
            .apply(QueueCommand::MarkProcessing(ids[0]))
            .apply(QueueCommand::MarkCompleted(ids[0]))
            .apply(QueueCommand::MarkError {
                id: ids[1],
                message: PROCESSING_FAILED.into(),
            })
            .apply(QueueCommand::ClearFinished);
        let left: Vec<Uuid> = q.items().iter().map(|i| i.id).collect();
        assert_eq!(left, vec![ids[1], ids[2]]);
        assert_eq!(q.items()[0].error.as_deref(), Some(PROCESSING_FAILED));
    }

    #[test]
    fn test_apply_leaves_previous_snapshot_untouched() {
        let (q, ids) = queue_of(&["a.png"]);
        let next = q.apply(QueueCommand::MarkProcessing(ids[0]));
        assert_eq!(q.items()[0].status, ProcessingStatus::Pending);
        assert_eq!(next.items()[0].status, ProcessingStatus::Processing);
    }

    #[tokio::test]
    async fn test_store_rejects_non_images_and_notifies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = QueueStore::new(tx);
        let out = store
            .enqueue(vec![
                file("a.png"),
                UploadFile::from_bytes("notes.pdf", "application/pdf", Bytes::new()),
            ])
            .await;
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.rejected, vec!["notes.pdf".to_string()]);
        assert!(matches!(rx.recv().await, Some(PipelineEvent::QueueChanged)));

        let (mime, bytes) = store.preview(out.accepted[0]).await.unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(&bytes[..], b"png");
        assert!(store.preview(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_transitions_report_whether_item_was_still_there() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let store = QueueStore::new(tx);
        let ids = store
            .enqueue(vec![file("a.png"), file("b.png")])
            .await
            .accepted;

        store.dispatch(QueueCommand::Pause(ids[0])).await;
        assert!(!store.mark_processing(ids[0]).await);
        assert_eq!(store.status(ids[0]).await, Some(ProcessingStatus::Paused));

        assert!(store.mark_processing(ids[1]).await);
        assert!(!store.mark_processing(ids[1]).await);
        store.dispatch(QueueCommand::Remove(ids[1])).await;
        assert!(!store.mark_completed(ids[1]).await);
        assert!(!store.contains(ids[1]).await);

        store.dispatch(QueueCommand::Resume(ids[0])).await;
        assert!(store.mark_processing(ids[0]).await);
        assert!(store.mark_completed(ids[0]).await);
        assert_eq!(store.status(ids[0]).await, Some(ProcessingStatus::Completed));
    }
}
