use dm_auth::{AuthGate, SledTokenCache};
use dm_chat::{ConversationManager, SessionStore, SledSessionStore};
use dm_core::{AppConfig, Library, Selection};
use dm_error::Result;
use dm_llm::{make_providers, AnswerModel, ExtractionModel, ProviderConfig};
use dm_queue::{Pipeline, PipelineHandle, PipelineNotice, QueueStore};
use dm_store::DocumentStore;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: PipelineHandle,
    pub records: DocumentStore,
    pub library: Arc<RwLock<Library>>,
    pub selection: Arc<RwLock<Selection>>,
    pub chat: Arc<ConversationManager>,
    pub auth: AuthGate,
    pub max_upload_bytes: usize,
}

/// 组装 `AppState` 所需的外部依赖，测试时可替换为内存实现
pub struct Services {
    pub extractor: Arc<dyn ExtractionModel>,
    pub answerer: Arc<dyn AnswerModel>,
    pub records: DocumentStore,
    pub sessions: Arc<dyn SessionStore>,
    pub auth: AuthGate,
}

impl Services {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let providers = make_providers(ProviderConfig::from_app(&cfg.provider)?)?;
        let records = DocumentStore::from_config(&cfg.store)?;

        let data_dir = Path::new(&cfg.chat.data_dir);
        let db = sled::open(data_dir.join("local"))?;
        let sessions: Arc<dyn SessionStore> = Arc::new(SledSessionStore::from_db(db.clone()));
        let auth = AuthGate::new(
            cfg.auth.password_hash.clone(),
            Arc::new(SledTokenCache::from_db(db)),
        );
        Ok(Self {
            extractor: providers.extractor,
            answerer: providers.answerer,
            records,
            sessions,
            auth,
        })
    }
}

impl AppState {
    /// 启动管线并加载已有记录；记录加载失败时以空库启动
    pub async fn start(services: Services, history_window: usize, max_upload_bytes: usize) -> Result<Self> {
        let pipeline = Pipeline::new(services.extractor, services.records.clone());
        let notices = pipeline.subscribe();
        let pipeline = pipeline.spawn();

        let records = match services.records.list().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "failed to load records, starting with an empty library");
                vec![]
            }
        };
        tracing::info!(count = records.len(), "library loaded");

        let chat = ConversationManager::open(services.sessions, services.answerer, history_window)?;
        let state = Self {
            pipeline,
            records: services.records,
            library: Arc::new(RwLock::new(Library::new(records))),
            selection: Arc::new(RwLock::new(Selection::default())),
            chat: Arc::new(chat),
            auth: services.auth,
            max_upload_bytes,
        };
        tokio::spawn(refresh_library(
            state.library.clone(),
            state.records.clone(),
            notices,
        ));
        Ok(state)
    }

    pub fn queue(&self) -> &QueueStore {
        self.pipeline.queue()
    }
}

/// 新写入的记录插到库缓存最前面；漏掉通知时整体从存储重载
async fn refresh_library(
    library: Arc<RwLock<Library>>,
    records: DocumentStore,
    mut notices: broadcast::Receiver<PipelineNotice>,
) {
    loop {
        match notices.recv().await {
            Ok(PipelineNotice::Committed(record)) => {
                let mut lib = library.write().await;
                *lib = lib.with_committed(record);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "library refresh lagged, reloading from store");
                match records.list().await {
                    Ok(list) => *library.write().await = Library::new(list),
                    Err(e) => tracing::error!(error = %e, "library reload failed"),
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dm_core::DocRecord;
    use uuid::Uuid;

    fn record(title: &str) -> DocRecord {
        DocRecord {
            id: Uuid::new_v4(),
            file_name: format!("{}.png", title),
            title: title.to_string(),
            interview_time: None,
            keywords: vec![],
            abstract_text: None,
            content: "body".into(),
            thumbnail: String::new(),
            full_image: String::new(),
            created_at: Utc::now(),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_missed_commits_are_recovered_from_store() {
        let store = DocumentStore::in_memory();
        let library = Arc::new(RwLock::new(Library::new(vec![])));
        let (tx, rx) = broadcast::channel(1);

        let mut committed = vec![];
        for title in ["a", "b", "c"] {
            let saved = store.create(record(title)).await.unwrap();
            // 容量为 1，前两条会被挤掉
            let _ = tx.send(PipelineNotice::Committed(saved.clone()));
            committed.push(saved);
        }
        drop(tx);

        refresh_library(library.clone(), store, rx).await;

        let lib = library.read().await;
        assert_eq!(lib.len(), 3);
        for r in &committed {
            assert!(lib.get(r.id).is_some());
        }
    }
}
