use crate::{ObjectStore, RecordStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dm_core::DocRecord;
use dm_error::{DmError, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String, // e.g. https://xyz.supabase.co
    pub anon_key: String,
    pub table: String,
    pub bucket: String,
}

impl SupabaseConfig {
    fn base(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.anon_key).header("apikey", &self.anon_key)
    }
}

async fn send(req: RequestBuilder, operation: &str) -> Result<Response> {
    let resp = req.send().await.map_err(|e| DmError::Network {
        operation: operation.to_string(),
        message: e.to_string(),
    })?;
    if !resp.status().is_success() {
        let status = resp.status();
        let txt = resp.text().await.unwrap_or_default();
        return Err(DmError::storage(
            operation,
            format!("status={} body={}", status, txt),
        ));
    }
    Ok(resp)
}

/// `expert_calls` 表的行格式
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExpertCallRow {
    id: Uuid,
    file_name: String,
    title: String,
    interview_time: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    content: Option<String>,
    thumbnail_url: Option<String>,
    full_image_url: Option<String>,
    created_at: DateTime<Utc>,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl From<&DocRecord> for ExpertCallRow {
    fn from(r: &DocRecord) -> Self {
        Self {
            id: r.id,
            file_name: r.file_name.clone(),
            title: r.title.clone(),
            interview_time: r.interview_time.clone().filter(|s| !s.is_empty()),
            keywords: r.keywords.clone(),
            abstract_text: r.abstract_text.clone().filter(|s| !s.is_empty()),
            content: non_empty(&r.content),
            thumbnail_url: non_empty(&r.thumbnail),
            full_image_url: non_empty(&r.full_image),
            created_at: r.created_at,
        }
    }
}

impl From<ExpertCallRow> for DocRecord {
    fn from(row: ExpertCallRow) -> Self {
        Self {
            id: row.id,
            file_name: row.file_name,
            title: row.title,
            interview_time: row.interview_time,
            keywords: row.keywords,
            abstract_text: row.abstract_text,
            content: row.content.unwrap_or_default(),
            thumbnail: row.thumbnail_url.unwrap_or_default(),
            full_image: row.full_image_url.unwrap_or_default(),
            created_at: row.created_at,
            tags: vec![],
        }
    }
}

/// PostgREST 上的记录表
#[derive(Clone)]
pub struct SupabaseRecordStore {
    http: Client,
    cfg: SupabaseConfig,
}

impl SupabaseRecordStore {
    pub fn new(cfg: SupabaseConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.cfg.base(), self.cfg.table)
    }
}

#[async_trait]
impl RecordStore for SupabaseRecordStore {
    async fn insert(&self, record: &DocRecord) -> Result<()> {
        let row = ExpertCallRow::from(record);
        let req = self
            .cfg
            .authed(self.http.post(self.table_url()))
            .header("Prefer", "return=minimal")
            .json(&row);
        send(req, "insert_record").await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DocRecord>> {
        let started = std::time::Instant::now();
        let req = self
            .cfg
            .authed(self.http.get(self.table_url()))
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        let rows: Vec<ExpertCallRow> = send(req, "list_records").await?.json().await?;
        tracing::info!(
            count = rows.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "records loaded"
        );
        Ok(rows.into_iter().map(DocRecord::from).collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DocRecord>> {
        let filter = format!("eq.{}", id);
        let req = self
            .cfg
            .authed(self.http.get(self.table_url()))
            .query(&[("select", "*"), ("id", filter.as_str())]);
        let rows: Vec<ExpertCallRow> = send(req, "get_record").await?.json().await?;
        Ok(rows.into_iter().next().map(DocRecord::from))
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        let filter = format!("eq.{}", id);
        let req = self
            .cfg
            .authed(self.http.delete(self.table_url()))
            .query(&[("id", filter.as_str())]);
        send(req, "delete_record").await?;
        Ok(())
    }
}

/// Supabase Storage 桶
#[derive(Clone)]
pub struct SupabaseObjectStore {
    http: Client,
    cfg: SupabaseConfig,
}

impl SupabaseObjectStore {
    pub fn new(cfg: SupabaseConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.cfg.base(),
            self.cfg.bucket,
            path
        )
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.cfg.base(),
            self.cfg.bucket,
            path
        )
    }
}

#[derive(Serialize)]
struct RemoveReq<'a> {
    prefixes: &'a [String],
}

#[async_trait]
impl ObjectStore for SupabaseObjectStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let req = self
            .cfg
            .authed(self.http.post(self.object_url(path)))
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes);
        send(req, "upload_object").await?;
        Ok(self.public_url(path))
    }

    async fn remove(&self, paths: &[String]) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}", self.cfg.base(), self.cfg.bucket);
        let req = self
            .cfg
            .authed(self.http.delete(url))
            .json(&RemoveReq { prefixes: paths });
        send(req, "remove_objects").await?;
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.cfg.bucket
    }
}
