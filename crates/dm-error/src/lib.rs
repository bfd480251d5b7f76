use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// 系统统一错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum DmError {
    // === 业务错误 ===
    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    #[error("请求无效: {reason}")]
    InvalidRequest { reason: String },

    #[error("认证失败: {message}")]
    Authentication { message: String },

    #[error("验证失败: {message}")]
    Validation { message: String },

    #[error("资源冲突: {details}")]
    Conflict { details: String },

    // === 技术错误 ===
    #[error("存储错误: {operation} 失败")]
    Storage { operation: String, message: String },

    #[error("LLM 服务错误 ({provider})")]
    LlmService {
        provider: String,
        message: String,
        #[serde(skip)]
        retry_after: Option<std::time::Duration>,
    },

    #[error("外部服务不可用: {service}")]
    ServiceUnavailable {
        service: String,
        #[serde(skip)]
        retry_after: Option<std::time::Duration>,
    },

    // === 系统错误 ===
    #[error("内部系统错误: {message}")]
    Internal {
        message: String,
        details: Option<String>,
    },

    #[error("配置错误: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("序列化错误: {format}")]
    Serialization { format: String, message: String },

    #[error("网络错误: {operation}")]
    Network { operation: String, message: String },

    #[error("超时错误: {operation} 超过 {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("并发错误: {operation}")]
    Concurrency { operation: String, message: String },

    #[error("文件读写错误: {path}")]
    Io { path: String, message: String },

    #[error("图片处理错误: {message}")]
    Image { message: String },
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的业务错误
    Medium,   // 技术错误但不影响核心功能
    High,     // 影响核心功能的错误
    Critical, // 系统级严重错误
}

/// 错误元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_id: String,
    pub severity: ErrorSeverity,
    pub component: String,
    pub operation: Option<String>,
    pub item_id: Option<String>,
    pub request_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub context: std::collections::HashMap<String, String>,
}

impl DmError {
    pub fn storage(operation: &str, message: impl std::fmt::Display) -> Self {
        DmError::Storage {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    pub fn not_found(resource: impl std::fmt::Display) -> Self {
        DmError::NotFound {
            resource: resource.to_string(),
        }
    }

    pub fn invalid(reason: impl std::fmt::Display) -> Self {
        DmError::InvalidRequest {
            reason: reason.to_string(),
        }
    }

    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DmError::NotFound { .. } | DmError::InvalidRequest { .. } => ErrorSeverity::Low,
            DmError::Authentication { .. }
            | DmError::Validation { .. }
            | DmError::Conflict { .. } => ErrorSeverity::Medium,
            DmError::Storage { .. } => ErrorSeverity::High,
            DmError::LlmService { .. } => ErrorSeverity::Medium,
            DmError::ServiceUnavailable { .. }
            | DmError::Network { .. }
            | DmError::Timeout { .. } => ErrorSeverity::Medium,
            DmError::Internal { .. } | DmError::Configuration { .. } => ErrorSeverity::Critical,
            DmError::Serialization { .. } | DmError::Concurrency { .. } => ErrorSeverity::High,
            DmError::Io { .. } | DmError::Image { .. } => ErrorSeverity::Medium,
        }
    }

    /// 是否为可重试错误
    ///
    /// 流水线对每个条目只尝试一次，这里仅用于日志和 HTTP 响应提示。
    pub fn is_retryable(&self) -> bool {
        match self {
            DmError::ServiceUnavailable { retry_after, .. } => retry_after.is_some(),
            DmError::Network { .. } | DmError::Timeout { .. } => true,
            DmError::LlmService { retry_after, .. } => retry_after.is_some(),
            DmError::Concurrency { .. } => true,
            _ => false,
        }
    }

    /// 获取重试延迟时间
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            DmError::ServiceUnavailable { retry_after, .. }
            | DmError::LlmService { retry_after, .. } => *retry_after,
            DmError::Network { .. } => Some(std::time::Duration::from_millis(500)),
            DmError::Timeout { .. } => Some(std::time::Duration::from_millis(1000)),
            DmError::Concurrency { .. } => Some(std::time::Duration::from_millis(100)),
            _ => None,
        }
    }

    /// 记录错误日志
    pub fn log(&self, metadata: &ErrorMetadata) {
        match metadata.severity {
            ErrorSeverity::Low => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    item_id = ?metadata.item_id,
                    request_id = ?metadata.request_id,
                    error = %self,
                    "业务错误"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    item_id = ?metadata.item_id,
                    request_id = ?metadata.request_id,
                    error = %self,
                    context = ?metadata.context,
                    "技术错误"
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    item_id = ?metadata.item_id,
                    request_id = ?metadata.request_id,
                    error = %self,
                    context = ?metadata.context,
                    severity = ?metadata.severity,
                    "严重错误"
                );
            }
        }
    }

    /// 转换为 HTTP 状态码
    pub fn to_http_status(&self) -> u16 {
        match self {
            DmError::NotFound { .. } => 404,
            DmError::InvalidRequest { .. } => 400,
            DmError::Authentication { .. } => 401,
            DmError::Validation { .. } => 400,
            DmError::Conflict { .. } => 409,
            DmError::ServiceUnavailable { .. } => 503,
            DmError::Timeout { .. } => 408,
            DmError::LlmService { .. } | DmError::Network { .. } => 502,
            _ => 500,
        }
    }

    /// 获取用户友好的错误消息
    pub fn user_message(&self) -> String {
        match self {
            DmError::NotFound { .. } => "请求的资源不存在".to_string(),
            DmError::InvalidRequest { .. } => "请求参数有误，请检查后重试".to_string(),
            DmError::Authentication { message } => message.clone(),
            DmError::Validation { .. } => "输入数据验证失败，请检查格式".to_string(),
            DmError::Conflict { .. } => "操作冲突，请稍后重试".to_string(),
            DmError::Storage { .. } => "数据保存失败，请稍后重试".to_string(),
            DmError::ServiceUnavailable { .. } => "服务暂时不可用，请稍后重试".to_string(),
            DmError::Timeout { .. } => "请求超时，请重试".to_string(),
            _ => "系统内部错误，请联系管理员".to_string(),
        }
    }
}

/// 创建错误元数据的便捷构造器
pub struct ErrorMetadataBuilder {
    metadata: ErrorMetadata,
}

impl ErrorMetadataBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            metadata: ErrorMetadata {
                error_id: uuid::Uuid::new_v4().to_string(),
                severity: ErrorSeverity::Medium,
                component: component.to_string(),
                operation: None,
                item_id: None,
                request_id: None,
                timestamp: chrono::Utc::now(),
                context: std::collections::HashMap::new(),
            },
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    pub fn item_id(mut self, item_id: &str) -> Self {
        self.metadata.item_id = Some(item_id.to_string());
        self
    }

    pub fn request_id(mut self, request_id: &str) -> Self {
        self.metadata.request_id = Some(request_id.to_string());
        self
    }

    pub fn context(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .context
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(mut self, error: &DmError) -> ErrorMetadata {
        self.metadata.severity = error.severity();
        self.metadata
    }
}

pub type Result<T> = std::result::Result<T, DmError>;

// === 转换实现 ===

impl From<serde_json::Error> for DmError {
    fn from(err: serde_json::Error) -> Self {
        DmError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for DmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DmError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: 30000,
            }
        } else if err.is_connect() {
            DmError::Network {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else {
            DmError::Network {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<uuid::Error> for DmError {
    fn from(err: uuid::Error) -> Self {
        DmError::Serialization {
            format: "uuid".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<base64::DecodeError> for DmError {
    fn from(err: base64::DecodeError) -> Self {
        DmError::Serialization {
            format: "base64".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for DmError {
    fn from(err: tokio::task::JoinError) -> Self {
        DmError::Concurrency {
            operation: "task_join".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for DmError {
    fn from(err: std::io::Error) -> Self {
        DmError::Io {
            path: String::new(),
            message: err.to_string(),
        }
    }
}

impl From<sled::Error> for DmError {
    fn from(err: sled::Error) -> Self {
        DmError::Storage {
            operation: "sled".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for DmError {
    fn from(err: anyhow::Error) -> Self {
        DmError::Internal {
            message: err.to_string(),
            details: None,
        }
    }
}

// Axum integration
#[cfg(feature = "axum")]
impl IntoResponse for DmError {
    fn into_response(self) -> axum::response::Response {
        let status_code =
            StatusCode::from_u16(self.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({
            "error": self.to_string(),
            "message": self.user_message()
        });

        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(DmError::not_found("record").to_http_status(), 404);
        assert_eq!(DmError::invalid("empty question").to_http_status(), 400);
        assert_eq!(
            DmError::Authentication {
                message: "密码错误，请重试".into()
            }
            .to_http_status(),
            401
        );
        assert_eq!(DmError::storage("insert", "boom").to_http_status(), 500);
    }

    #[test]
    fn test_authentication_message_is_passed_through() {
        let err = DmError::Authentication {
            message: "密码错误，请重试".into(),
        };
        assert_eq!(err.user_message(), "密码错误，请重试");
    }

    #[test]
    fn test_metadata_builder_takes_error_severity() {
        let err = DmError::storage("insert", "connection reset");
        let meta = ErrorMetadataBuilder::new("pipeline")
            .operation("commit")
            .item_id("abc")
            .build(&err);
        assert_eq!(meta.severity, ErrorSeverity::High);
        assert_eq!(meta.item_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_retryable() {
        assert!(DmError::Network {
            operation: "connect".into(),
            message: "refused".into()
        }
        .is_retryable());
        assert!(!DmError::not_found("x").is_retryable());
    }
}
