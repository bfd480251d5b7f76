use async_trait::async_trait;
use dm_core::config::{read_env, ProviderCfg};
use dm_core::{ChatMessage, ChatRole, DocRecord, ExtractedContent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod gemini;
pub mod prompts;
pub mod proxy;

pub use dm_error::{DmError, Result};
pub use gemini::{GeminiClient, GeminiConfig};
pub use proxy::{ProxyClient, ProxyConfig};

pub const EMPTY_ANSWER: &str = "Sorry, I could not generate a response.";

/// 图片 -> 结构化字段
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    async fn extract(&self, base64_image: &str, mime_type: &str) -> Result<ExtractedContent>;
}

/// 基于文档上下文的问答，回答中带 `[[id]]` 引用标记
#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn answer(&self, question: &str, context: &str, history: &str) -> Result<String>;
}

/// 抽取失败不向上传播，返回固定兜底对象；成功时补齐缺失字段
pub async fn extract_or_fallback(
    model: &dyn ExtractionModel,
    base64_image: &str,
    mime_type: &str,
) -> ExtractedContent {
    match model.extract(base64_image, mime_type).await {
        Ok(content) => content.or_fallback(),
        Err(e) => {
            tracing::warn!(error = %e, mime_type, "extraction failed, using fallback");
            ExtractedContent::fallback()
        }
    }
}

/// 把全部文档拼成问答上下文，不分块不排序
pub fn build_context(records: &[DocRecord]) -> String {
    records
        .iter()
        .map(|record| {
            let abstract_line = record
                .abstract_text
                .as_deref()
                .filter(|a| !a.is_empty())
                .map(|a| format!("摘要: {}\n", a))
                .unwrap_or_default();
            format!(
                "<document id=\"{}\">\n  <title>{}</title>\n  <content>\n  {}  {}\n  </content>\n</document>",
                record.id, record.title, abstract_line, record.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 取最近 `window` 条消息渲染成对话历史
pub fn format_history(messages: &[ChatMessage], window: usize) -> String {
    let start = messages.len().saturating_sub(window);
    messages[start..]
        .iter()
        .map(|m| {
            let who = match m.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            format!("{}: {}", who, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ========== Provider Factory & Config ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProviderConfig {
    #[serde(rename = "gemini")]
    Gemini {
        base_url: Option<String>,
        api_key: String,
        model: Option<String>,
    },
    #[serde(rename = "proxy")]
    Proxy { base_url: String, api_key: String },
}

impl ProviderConfig {
    /// 由 YAML 配置构造；密钥从 `api_key_env` 指向的环境变量读取
    pub fn from_app(cfg: &ProviderCfg) -> Result<Self> {
        match cfg.kind.as_str() {
            "gemini" => Ok(ProviderConfig::Gemini {
                base_url: cfg.base_url.clone(),
                api_key: read_env(cfg.api_key_env.as_deref().unwrap_or("GEMINI_API_KEY"))?,
                model: cfg.model.clone(),
            }),
            "proxy" => Ok(ProviderConfig::Proxy {
                base_url: cfg.base_url.clone().ok_or_else(|| DmError::Configuration {
                    key: "provider.base_url".to_string(),
                    reason: "required for proxy".to_string(),
                })?,
                api_key: read_env(cfg.api_key_env.as_deref().unwrap_or("SUPABASE_ANON_KEY"))?,
            }),
            other => Err(DmError::Configuration {
                key: "provider.kind".to_string(),
                reason: format!("unknown provider {}", other),
            }),
        }
    }
}

pub struct Providers {
    pub extractor: Arc<dyn ExtractionModel>,
    pub answerer: Arc<dyn AnswerModel>,
}

pub fn make_providers(cfg: ProviderConfig) -> Result<Providers> {
    match cfg {
        ProviderConfig::Gemini {
            base_url,
            api_key,
            model,
        } => {
            if api_key.is_empty() {
                return Err(DmError::Configuration {
                    key: "provider.api_key".to_string(),
                    reason: "empty".to_string(),
                });
            }
            let client = Arc::new(GeminiClient::new(GeminiConfig {
                api_key,
                model: model.unwrap_or_else(|| gemini::DEFAULT_GEMINI_MODEL.into()),
                base_url: base_url.unwrap_or_else(|| gemini::DEFAULT_GEMINI_URL.into()),
            }));
            Ok(Providers {
                extractor: client.clone(),
                answerer: client,
            })
        }
        ProviderConfig::Proxy { base_url, api_key } => {
            let client = Arc::new(ProxyClient::new(ProxyConfig { base_url, api_key }));
            Ok(Providers {
                extractor: client.clone(),
                answerer: client,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    struct FailingExtractor;

    #[async_trait]
    impl ExtractionModel for FailingExtractor {
        async fn extract(&self, _b64: &str, _mime: &str) -> Result<ExtractedContent> {
            Err(DmError::Network {
                operation: "http_request".into(),
                message: "connection refused".into(),
            })
        }
    }

    struct PartialExtractor;

    #[async_trait]
    impl ExtractionModel for PartialExtractor {
        async fn extract(&self, _b64: &str, _mime: &str) -> Result<ExtractedContent> {
            Ok(ExtractedContent {
                title: "Alpha".into(),
                ..Default::default()
            })
        }
    }

    fn record(title: &str, abstract_text: Option<&str>, content: &str) -> DocRecord {
        DocRecord {
            id: Uuid::new_v4(),
            file_name: "f.png".into(),
            title: title.into(),
            interview_time: None,
            keywords: vec![],
            abstract_text: abstract_text.map(Into::into),
            content: content.into(),
            thumbnail: String::new(),
            full_image: String::new(),
            created_at: Utc::now(),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_extraction_failure_falls_back() {
        let out = extract_or_fallback(&FailingExtractor, "AAAA", "image/png").await;
        assert_eq!(out, ExtractedContent::fallback());
    }

    #[tokio::test]
    async fn test_partial_response_is_filled() {
        let out = extract_or_fallback(&PartialExtractor, "AAAA", "image/png").await;
        assert_eq!(out.title, "Alpha");
        assert_eq!(out.content, dm_core::models::FALLBACK_CONTENT);
    }

    #[test]
    fn test_context_wraps_each_document() {
        let a = record("Alpha", Some("short"), "body a");
        let b = record("Beta", None, "body b");
        let ctx = build_context(&[a.clone(), b.clone()]);
        assert!(ctx.contains(&format!("<document id=\"{}\">", a.id)));
        assert!(ctx.contains("<title>Beta</title>"));
        assert!(ctx.contains("摘要: short"));
        assert_eq!(ctx.matches("摘要:").count(), 1);
        assert!(ctx.contains("\n\n<document"));
    }

    #[test]
    fn test_history_keeps_last_window() {
        let msgs: Vec<ChatMessage> = (0..12)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{}", i))
                } else {
                    ChatMessage::assistant(format!("a{}", i))
                }
            })
            .collect();
        let h = format_history(&msgs, 10);
        assert!(!h.contains("User: q0"));
        assert!(!h.contains("Assistant: a1"));
        assert!(h.starts_with("User: q2"));
        assert!(h.ends_with("Assistant: a11"));
    }

    #[test]
    fn test_provider_config_tagged() {
        let cfg: ProviderConfig =
            serde_json::from_str(r#"{"kind":"proxy","base_url":"https://x","api_key":"k"}"#)
                .unwrap();
        assert!(matches!(cfg, ProviderConfig::Proxy { .. }));
        assert!(make_providers(cfg).is_ok());

        let bad = ProviderConfig::Gemini {
            base_url: None,
            api_key: String::new(),
            model: None,
        };
        assert!(make_providers(bad).is_err());
    }

    #[test]
    fn test_from_app_rejects_unknown_kind() {
        let cfg = ProviderCfg {
            kind: "openai".into(),
            base_url: None,
            model: None,
            api_key_env: None,
        };
        assert!(matches!(
            ProviderConfig::from_app(&cfg),
            Err(DmError::Configuration { .. })
        ));
    }
}
