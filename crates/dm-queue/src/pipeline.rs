use crate::lock::{LockGuard, ProcessingLock};
use crate::queue::{read_source, QueueCommand, QueueStore, PROCESSING_FAILED};
use crate::thumbnail::{make_thumbnail, THUMBNAIL_MAX_EDGE};
use crate::{PipelineEvent, PipelineNotice};
use base64::Engine as _;
use chrono::Utc;
use dm_core::{DocRecord, ExtractedContent, ProcessingStatus, UploadQueueItem};
use dm_error::{ErrorMetadataBuilder, Result};
use dm_llm::{extract_or_fallback, ExtractionModel};
use dm_store::images::to_data_url;
use dm_store::DocumentStore;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

const NOTICE_CAPACITY: usize = 64;

/// 处理一个条目所需的共享上下文
struct JobContext {
    queue: QueueStore,
    lock: ProcessingLock,
    extractor: Arc<dyn ExtractionModel>,
    records: DocumentStore,
    notices: broadcast::Sender<PipelineNotice>,
}

/// 队列处理驱动；`spawn` 后在后台任务中消费事件
pub struct Pipeline {
    ctx: Arc<JobContext>,
    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    events_rx: mpsc::UnboundedReceiver<PipelineEvent>,
}

#[derive(Clone)]
pub struct PipelineHandle {
    queue: QueueStore,
    notices: broadcast::Sender<PipelineNotice>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl Pipeline {
    pub fn new(extractor: Arc<dyn ExtractionModel>, records: DocumentStore) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let ctx = Arc::new(JobContext {
            queue: QueueStore::new(events_tx.clone()),
            lock: ProcessingLock::new(events_tx.clone()),
            extractor,
            records,
            notices,
        });
        Self {
            ctx,
            events_tx,
            events_rx,
        }
    }

    pub fn queue(&self) -> QueueStore {
        self.ctx.queue.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineNotice> {
        self.ctx.notices.subscribe()
    }

    pub fn spawn(self) -> PipelineHandle {
        let Pipeline {
            ctx,
            events_tx,
            events_rx,
        } = self;
        // 启动前已入队的条目也要被处理
        let _ = events_tx.send(PipelineEvent::QueueChanged);
        let handle = PipelineHandle {
            queue: ctx.queue.clone(),
            notices: ctx.notices.clone(),
            events: events_tx,
            task: Arc::new(std::sync::Mutex::new(None)),
        };
        let task = tokio::spawn(run(ctx, events_rx));
        if let Ok(mut slot) = handle.task.lock() {
            *slot = Some(task);
        }
        handle
    }
}

impl PipelineHandle {
    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineNotice> {
        self.notices.subscribe()
    }

    /// 停止驱动；正在处理的任务自行结束
    pub async fn shutdown(&self) {
        let _ = self.events.send(PipelineEvent::Shutdown);
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "pipeline driver ended abnormally");
            }
        }
    }
}

async fn run(ctx: Arc<JobContext>, mut events: mpsc::UnboundedReceiver<PipelineEvent>) {
    tracing::info!("pipeline driver started");
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Shutdown => break,
            PipelineEvent::QueueChanged | PipelineEvent::LockReleased => try_step(&ctx).await,
        }
    }
    tracing::info!("pipeline driver stopped");
}

/// 每个事件只尝试一次：锁被占用或没有 PENDING 时直接返回
async fn try_step(ctx: &Arc<JobContext>) {
    if ctx.lock.is_held() {
        return;
    }
    let snapshot = ctx.queue.snapshot().await;
    let Some(item) = snapshot.next_pending().cloned() else {
        if snapshot.count(ProcessingStatus::Processing) == 0 {
            let _ = ctx.notices.send(PipelineNotice::Idle);
        }
        return;
    };
    let Some(guard) = ctx.lock.try_acquire() else {
        return;
    };
    // 快照之后被暂停或移除：放弃本次，释放锁会触发下一轮
    if !ctx.queue.mark_processing(item.id).await {
        tracing::debug!(item_id = %item.id, "item left PENDING before start");
        drop(guard);
        return;
    }
    let _ = ctx.notices.send(PipelineNotice::Started {
        id: item.id,
        file_name: item.file.file_name.clone(),
    });
    let job_ctx = ctx.clone();
    tokio::spawn(async move { job_ctx.run_job(item, guard).await });
}

enum JobOutcome {
    Committed(DocRecord),
    Aborted,
}

impl JobContext {
    async fn run_job(&self, item: UploadQueueItem, _guard: LockGuard) {
        let started = std::time::Instant::now();
        match self.process(&item).await {
            Ok(JobOutcome::Committed(record)) => {
                tracing::info!(
                    item_id = %item.id,
                    file_name = %item.file.file_name,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "item completed"
                );
                let _ = self.notices.send(PipelineNotice::Committed(record));
            }
            Ok(JobOutcome::Aborted) => {
                let _ = self.notices.send(PipelineNotice::Aborted { id: item.id });
            }
            Err(e) => {
                let meta = ErrorMetadataBuilder::new("pipeline")
                    .operation("process_item")
                    .item_id(&item.id.to_string())
                    .context("file_name", &item.file.file_name)
                    .build(&e);
                e.log(&meta);
                if self.queue.contains(item.id).await {
                    self.queue
                        .dispatch(QueueCommand::MarkError {
                            id: item.id,
                            message: PROCESSING_FAILED.to_string(),
                        })
                        .await;
                }
                let _ = self.notices.send(PipelineNotice::Failed {
                    id: item.id,
                    message: PROCESSING_FAILED.to_string(),
                });
            }
        }
    }

    /// 条目仍在队列中且未暂停
    async fn checkpoint(&self, id: Uuid, stage: &str) -> bool {
        match self.queue.status(id).await {
            Some(status) if status != ProcessingStatus::Paused => true,
            _ => {
                tracing::info!(item_id = %id, stage, "processing aborted (removed or paused)");
                false
            }
        }
    }

    #[instrument(skip(self, item), fields(item_id = %item.id, file_name = %item.file.file_name))]
    async fn process(&self, item: &UploadQueueItem) -> Result<JobOutcome> {
        let bytes = read_source(&item.file.source).await?;
        let base64_data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        if !self.checkpoint(item.id, "read").await {
            return Ok(JobOutcome::Aborted);
        }

        let extracted =
            extract_or_fallback(self.extractor.as_ref(), &base64_data, &item.file.mime_type).await;
        if !self.checkpoint(item.id, "extract").await {
            return Ok(JobOutcome::Aborted);
        }

        let full_image = to_data_url(&item.file.mime_type, &base64_data);
        let thumbnail = tokio::task::spawn_blocking(move || make_thumbnail(&bytes, THUMBNAIL_MAX_EDGE))
            .await?
            .unwrap_or_else(|e| {
                tracing::warn!(item_id = %item.id, error = %e, "thumbnail failed, using full image");
                full_image.clone()
            });
        let record = build_record(item, extracted, thumbnail, full_image);
        if !self.checkpoint(item.id, "commit").await {
            return Ok(JobOutcome::Aborted);
        }

        let saved = self.records.create(record).await?;
        // 检查与标记完成在同一把写锁内；写库期间被移除则撤销刚写入的记录
        if !self.queue.mark_completed(item.id).await {
            tracing::info!(item_id = %item.id, "item removed during commit, rolling back record");
            self.records.delete(saved.id).await?;
            return Ok(JobOutcome::Aborted);
        }
        Ok(JobOutcome::Committed(saved))
    }
}

/// 标题为空或为兜底标题时退回文件名（去扩展名）
pub fn build_record(
    item: &UploadQueueItem,
    extracted: ExtractedContent,
    thumbnail: String,
    full_image: String,
) -> DocRecord {
    let title = if extracted.has_usable_title() {
        extracted.title
    } else {
        item.file.stem().to_string()
    };
    DocRecord {
        id: item.id,
        file_name: item.file.file_name.clone(),
        title,
        interview_time: Some(extracted.interview_time).filter(|s| !s.is_empty()),
        keywords: extracted.keywords,
        abstract_text: Some(extracted.abstract_text).filter(|s| !s.is_empty()),
        content: extracted.content,
        thumbnail,
        full_image,
        created_at: Utc::now(),
        tags: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use dm_core::UploadFile;
    use dm_error::DmError;
    use dm_store::{MemoryObjectStore, MemoryRecordStore, RecordStore};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// 每次抽取消耗一个许可，用来卡住处理中的条目
    struct GatedExtractor {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl ExtractionModel for GatedExtractor {
        async fn extract(&self, _b64: &str, _mime: &str) -> Result<ExtractedContent> {
            self.gate.acquire().await.unwrap().forget();
            Ok(ExtractedContent {
                keywords: vec!["expert".into()],
                content: "body".into(),
                ..Default::default()
            })
        }
    }

    struct BrokenExtractor;

    #[async_trait]
    impl ExtractionModel for BrokenExtractor {
        async fn extract(&self, _b64: &str, _mime: &str) -> Result<ExtractedContent> {
            Err(DmError::LlmService {
                provider: "mock".into(),
                message: "boom".into(),
                retry_after: None,
            })
        }
    }

    fn file(name: &str) -> UploadFile {
        UploadFile::from_bytes(name, "image/png", Bytes::from_static(b"not-really-png"))
    }

    fn gated(permits: usize) -> (Pipeline, Arc<Semaphore>, DocumentStore) {
        let gate = Arc::new(Semaphore::new(permits));
        let store = DocumentStore::in_memory();
        let pipeline = Pipeline::new(
            Arc::new(GatedExtractor { gate: gate.clone() }),
            store.clone(),
        );
        (pipeline, gate, store)
    }

    async fn next_notice(rx: &mut broadcast::Receiver<PipelineNotice>) -> PipelineNotice {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("notice within timeout")
            .expect("channel open")
    }

    /// 跳过 Started/Idle，只看终态通知
    async fn next_outcome(rx: &mut broadcast::Receiver<PipelineNotice>) -> PipelineNotice {
        loop {
            match next_notice(rx).await {
                PipelineNotice::Started { .. } | PipelineNotice::Idle => continue,
                other => return other,
            }
        }
    }

    async fn wait_started(rx: &mut broadcast::Receiver<PipelineNotice>) -> Uuid {
        loop {
            if let PipelineNotice::Started { id, .. } = next_notice(rx).await {
                return id;
            }
        }
    }

    #[tokio::test]
    async fn test_fifo_and_paused_items_are_skipped() {
        let (pipeline, _gate, store) = gated(16);
        let queue = pipeline.queue();
        let mut rx = pipeline.subscribe();
        let ids = queue
            .enqueue(vec![file("a.png"), file("b.png"), file("c.png")])
            .await
            .accepted;
        queue.dispatch(QueueCommand::Pause(ids[1])).await;
        let handle = pipeline.spawn();

        let mut committed = vec![];
        for _ in 0..2 {
            match next_outcome(&mut rx).await {
                PipelineNotice::Committed(r) => committed.push(r.title),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(committed, vec!["a".to_string(), "c".to_string()]);

        let snap = queue.snapshot().await;
        assert_eq!(snap.get(ids[1]).map(|i| i.status), Some(ProcessingStatus::Paused));
        assert_eq!(snap.count(ProcessingStatus::Completed), 2);
        assert_eq!(store.list().await.unwrap().len(), 2);

        let record = store.get(ids[0]).await.unwrap().unwrap();
        assert_eq!(record.keywords, vec!["expert".to_string()]);
        assert!(record.full_image.starts_with("memory://") || record.full_image.starts_with("data:image/png;base64,"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_at_most_one_processing() {
        let (pipeline, gate, _store) = gated(0);
        let queue = pipeline.queue();
        let mut rx = pipeline.subscribe();
        queue
            .enqueue(vec![file("a.png"), file("b.png"), file("c.png")])
            .await;
        let handle = pipeline.spawn();

        wait_started(&mut rx).await;
        // 再投递几次事件，也不会启动第二个
        queue.enqueue(vec![file("d.png")]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = queue.snapshot().await;
        assert_eq!(snap.count(ProcessingStatus::Processing), 1);
        assert_eq!(snap.count(ProcessingStatus::Pending), 3);

        gate.add_permits(4);
        for _ in 0..4 {
            assert!(matches!(next_outcome(&mut rx).await, PipelineNotice::Committed(_)));
            assert!(queue.snapshot().await.count(ProcessingStatus::Processing) <= 1);
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_removal_while_processing_produces_no_record() {
        let (pipeline, gate, store) = gated(0);
        let queue = pipeline.queue();
        let mut rx = pipeline.subscribe();
        let ids = queue.enqueue(vec![file("a.png"), file("b.png")]).await.accepted;
        let handle = pipeline.spawn();

        assert_eq!(wait_started(&mut rx).await, ids[0]);
        queue.dispatch(QueueCommand::Remove(ids[0])).await;
        gate.add_permits(2);

        assert!(matches!(
            next_outcome(&mut rx).await,
            PipelineNotice::Aborted { id } if id == ids[0]
        ));
        match next_outcome(&mut rx).await {
            PipelineNotice::Committed(r) => assert_eq!(r.id, ids[1]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(store.get(ids[0]).await.unwrap().is_none());
        assert!(queue.snapshot().await.get(ids[0]).is_none());
        handle.shutdown().await;
    }

    /// insert 进入后停住，等测试放行
    struct HeldRecords {
        inner: MemoryRecordStore,
        entered: Arc<Semaphore>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl RecordStore for HeldRecords {
        async fn insert(&self, record: &DocRecord) -> Result<()> {
            self.entered.add_permits(1);
            self.release.acquire().await.unwrap().forget();
            self.inner.insert(record).await
        }

        async fn list(&self) -> Result<Vec<DocRecord>> {
            self.inner.list().await
        }

        async fn get(&self, id: Uuid) -> Result<Option<DocRecord>> {
            self.inner.get(id).await
        }

        async fn remove(&self, id: Uuid) -> Result<()> {
            self.inner.remove(id).await
        }
    }

    #[tokio::test]
    async fn test_removal_during_insert_rolls_back_record() {
        let entered = Arc::new(Semaphore::new(0));
        let release = Arc::new(Semaphore::new(0));
        let store = DocumentStore::new(
            Arc::new(HeldRecords {
                inner: MemoryRecordStore::default(),
                entered: entered.clone(),
                release: release.clone(),
            }),
            Arc::new(MemoryObjectStore::new("expert-images")),
        );
        let pipeline = Pipeline::new(
            Arc::new(GatedExtractor {
                gate: Arc::new(Semaphore::new(16)),
            }),
            store.clone(),
        );
        let queue = pipeline.queue();
        let mut rx = pipeline.subscribe();
        let ids = queue.enqueue(vec![file("a.png")]).await.accepted;
        let handle = pipeline.spawn();

        tokio::time::timeout(Duration::from_secs(5), entered.acquire())
            .await
            .unwrap()
            .unwrap()
            .forget();
        queue.dispatch(QueueCommand::Remove(ids[0])).await;
        release.add_permits(1);

        assert!(matches!(
            next_outcome(&mut rx).await,
            PipelineNotice::Aborted { id } if id == ids[0]
        ));
        assert!(store.list().await.unwrap().is_empty());
        assert!(queue.snapshot().await.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_does_not_block_later_items() {
        let (pipeline, _gate, store) = gated(16);
        let queue = pipeline.queue();
        let mut rx = pipeline.subscribe();
        let missing = UploadFile::from_path("/nonexistent/documind/a.png".into(), "image/png");
        let ids = queue.enqueue(vec![missing, file("b.png")]).await.accepted;
        let handle = pipeline.spawn();

        assert!(matches!(
            next_outcome(&mut rx).await,
            PipelineNotice::Failed { id, .. } if id == ids[0]
        ));
        assert!(matches!(next_outcome(&mut rx).await, PipelineNotice::Committed(_)));

        let snap = queue.snapshot().await;
        let failed = snap.get(ids[0]).unwrap();
        assert_eq!(failed.status, ProcessingStatus::Error);
        assert_eq!(failed.error.as_deref(), Some(PROCESSING_FAILED));
        assert_eq!(store.list().await.unwrap().len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_extraction_failure_still_commits_with_file_stem() {
        let store = DocumentStore::in_memory();
        let pipeline = Pipeline::new(Arc::new(BrokenExtractor), store.clone());
        let queue = pipeline.queue();
        let mut rx = pipeline.subscribe();
        queue.enqueue(vec![file("专家访谈.png")]).await;
        let handle = pipeline.spawn();

        match next_outcome(&mut rx).await {
            PipelineNotice::Committed(r) => {
                assert_eq!(r.title, "专家访谈");
                assert_eq!(r.content, dm_core::models::FALLBACK_CONTENT);
            }
            other => panic!("unexpected {:?}", other),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_reports_idle_when_drained() {
        let (pipeline, _gate, _store) = gated(16);
        let queue = pipeline.queue();
        let mut rx = pipeline.subscribe();
        queue.enqueue(vec![file("a.png")]).await;
        let handle = pipeline.spawn();
        loop {
            if matches!(next_notice(&mut rx).await, PipelineNotice::Idle)
                && queue.snapshot().await.count(ProcessingStatus::Completed) == 1
            {
                break;
            }
        }
        handle.shutdown().await;
    }
}
