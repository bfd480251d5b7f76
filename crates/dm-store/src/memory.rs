use crate::{ObjectStore, RecordStore};
use async_trait::async_trait;
use dm_core::DocRecord;
use dm_error::{DmError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

/// 进程内记录存储，开发与测试用
#[derive(Default)]
pub struct MemoryRecordStore {
    rows: RwLock<HashMap<Uuid, DocRecord>>,
}

fn poisoned(op: &str) -> DmError {
    DmError::Concurrency {
        operation: op.to_string(),
        message: "lock poisoned".to_string(),
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: &DocRecord) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| poisoned("insert"))?;
        if rows.contains_key(&record.id) {
            return Err(DmError::Conflict {
                details: format!("record {} already exists", record.id),
            });
        }
        rows.insert(record.id, record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DocRecord>> {
        let rows = self.rows.read().map_err(|_| poisoned("list"))?;
        let mut out: Vec<DocRecord> = rows.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn get(&self, id: Uuid) -> Result<Option<DocRecord>> {
        let rows = self.rows.read().map_err(|_| poisoned("get"))?;
        Ok(rows.get(&id).cloned())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| poisoned("remove"))?;
        rows.remove(&id);
        Ok(())
    }
}

pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
        }
    }

    /// 让后续上传全部失败
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(DmError::storage("upload", "object store unavailable"));
        }
        let mut objects = self.objects.write().map_err(|_| poisoned("upload"))?;
        objects.insert(path.to_string(), bytes);
        Ok(format!("memory://{}/{}", self.bucket, path))
    }

    async fn remove(&self, paths: &[String]) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| poisoned("remove"))?;
        for p in paths {
            objects.remove(p);
        }
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
