use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// 一条已归档的专家访谈纪要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRecord {
    pub id: Uuid,
    pub file_name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interview_time: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub content: String,
    /// 缩略图：data URL 或对象存储的公开 URL
    #[serde(default)]
    pub thumbnail: String,
    /// 原图：data URL 或对象存储的公开 URL
    #[serde(default)]
    pub full_image: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 上传队列条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Paused,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Error)
    }
}

/// 待处理文件的来源
#[derive(Debug, Clone)]
pub enum FileSource {
    /// HTTP 上传的内容，已在内存中
    Bytes(Bytes),
    /// 本地磁盘路径（批量导入）
    Path(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub source: FileSource,
}

impl UploadFile {
    pub fn from_bytes(file_name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            source: FileSource::Bytes(data),
        }
    }

    pub fn from_path(path: PathBuf, mime_type: impl Into<String>) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            file_name,
            mime_type: mime_type.into(),
            source: FileSource::Path(path),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// 去掉扩展名的文件名，标题提取失败时用作标题
    pub fn stem(&self) -> &str {
        match self.file_name.rfind('.') {
            Some(idx) if idx > 0 => &self.file_name[..idx],
            _ => &self.file_name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQueueItem {
    pub id: Uuid,
    pub file: UploadFile,
    pub preview_url: String,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 抽取服务返回的结构化字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub interview_time: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub content: String,
}

pub const FALLBACK_TITLE: &str = "标题提取失败";
pub const FALLBACK_CONTENT: &str = "无法解析文档结构，请重试。";

impl ExtractedContent {
    /// 抽取失败时使用的固定兜底对象
    pub fn fallback() -> Self {
        Self {
            title: FALLBACK_TITLE.to_string(),
            content: FALLBACK_CONTENT.to_string(),
            ..Default::default()
        }
    }

    /// 用兜底值补齐缺失字段
    pub fn or_fallback(mut self) -> Self {
        if self.title.trim().is_empty() {
            self.title = FALLBACK_TITLE.to_string();
        }
        if self.content.trim().is_empty() {
            self.content = FALLBACK_CONTENT.to_string();
        }
        self
    }

    pub fn has_usable_title(&self) -> bool {
        !self.title.trim().is_empty() && self.title != FALLBACK_TITLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    /// 毫秒时间戳
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content.into(), false)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content.into(), false)
    }

    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content.into(), true)
    }

    fn new(role: ChatRole, content: String, is_error: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now().timestamp_millis(),
            is_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// 毫秒时间戳
    pub updated_at: i64,
}
