use async_trait::async_trait;
use dm_core::config::{read_env, StoreCfg};
use dm_core::DocRecord;
use dm_error::{DmError, Result};
use std::sync::Arc;
use uuid::Uuid;

pub mod images;
pub mod memory;
pub mod supabase;

pub use memory::{MemoryObjectStore, MemoryRecordStore};
pub use supabase::{SupabaseConfig, SupabaseObjectStore, SupabaseRecordStore};

pub const DEFAULT_TABLE: &str = "expert_calls";
pub const DEFAULT_BUCKET: &str = "expert-images";

/// 记录行存储，只负责行本身
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: &DocRecord) -> Result<()>;
    /// 按创建时间倒序
    async fn list(&self) -> Result<Vec<DocRecord>>;
    async fn get(&self, id: Uuid) -> Result<Option<DocRecord>>;
    async fn remove(&self, id: Uuid) -> Result<()>;
}

/// 图片对象存储
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 上传并返回公开 URL
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
    async fn remove(&self, paths: &[String]) -> Result<()>;
    fn bucket(&self) -> &str;
}

/// 记录持久化入口：写库前外置图片，删除时顺带清理图片
#[derive(Clone)]
pub struct DocumentStore {
    rows: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
}

impl DocumentStore {
    pub fn new(rows: Arc<dyn RecordStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { rows, objects }
    }

    /// `kind` 为 memory 或 supabase
    pub fn from_config(cfg: &StoreCfg) -> Result<Self> {
        match cfg.kind.as_str() {
            "memory" => Ok(Self::in_memory()),
            "supabase" => {
                let url = cfg.url.clone().ok_or_else(|| DmError::Configuration {
                    key: "store.url".to_string(),
                    reason: "required for supabase".to_string(),
                })?;
                let sb = SupabaseConfig {
                    url,
                    anon_key: read_env(cfg.anon_key_env.as_deref().unwrap_or("SUPABASE_ANON_KEY"))?,
                    table: cfg.table.clone().unwrap_or_else(|| DEFAULT_TABLE.to_string()),
                    bucket: cfg.bucket.clone().unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
                };
                Ok(Self::new(
                    Arc::new(SupabaseRecordStore::new(sb.clone())),
                    Arc::new(SupabaseObjectStore::new(sb)),
                ))
            }
            other => Err(DmError::Configuration {
                key: "store.kind".to_string(),
                reason: format!("unknown store {}", other),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryRecordStore::default()),
            Arc::new(MemoryObjectStore::new(DEFAULT_BUCKET)),
        )
    }

    /// 返回实际落库的记录（图片可能已换成公开 URL）
    pub async fn create(&self, record: DocRecord) -> Result<DocRecord> {
        let record = images::externalize_images(record, self.objects.as_ref()).await;
        self.rows.insert(&record).await?;
        tracing::info!(record_id = %record.id, title = %record.title, "record saved");
        Ok(record)
    }

    pub async fn list(&self) -> Result<Vec<DocRecord>> {
        self.rows.list().await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<DocRecord>> {
        self.rows.get(id).await
    }

    /// 图片清理失败只记日志，行删除失败向上传播
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if let Some(record) = self.rows.get(id).await? {
            if let Err(e) = images::remove_images(&record, self.objects.as_ref()).await {
                tracing::warn!(record_id = %id, error = %e, "image cleanup failed");
            }
        }
        self.rows.remove(id).await?;
        tracing::info!(record_id = %id, "record deleted");
        Ok(())
    }
}
