use crate::{AnswerModel, ExtractionModel};
use async_trait::async_trait;
use dm_core::ExtractedContent;
use dm_error::{DmError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub const PROXY_FUNCTION: &str = "gemini-proxy";

/// 经 Supabase 边缘函数中转的 Gemini 调用，密钥留在服务端
#[derive(Clone)]
pub struct ProxyConfig {
    pub base_url: String, // e.g. https://xyz.supabase.co
    pub api_key: String,  // anon key
}

#[derive(Clone)]
pub struct ProxyClient {
    http: Client,
    cfg: ProxyConfig,
}

impl ProxyClient {
    pub fn new(cfg: ProxyConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/functions/v1/{}",
            self.cfg.base_url.trim_end_matches('/'),
            PROXY_FUNCTION
        )
    }

    async fn invoke<T: for<'de> Deserialize<'de>>(&self, body: &ProxyReq<'_>) -> Result<T> {
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.cfg.api_key)
            .header("apikey", &self.cfg.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| DmError::Network {
                operation: "http_request".to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(DmError::LlmService {
                provider: "gemini_proxy".to_string(),
                message: format!("status={} body={}", status, txt),
                retry_after: None,
            });
        }

        resp.json().await.map_err(|e| DmError::Network {
            operation: "http_request".to_string(),
            message: e.to_string(),
        })
    }
}

#[derive(Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ProxyReq<'a> {
    Extract {
        #[serde(rename = "base64Image")]
        base64_image: &'a str,
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
    },
    Query {
        prompt: &'a str,
        context: &'a str,
        history: &'a str,
    },
}

#[derive(Deserialize)]
struct QueryResp {
    answer: Option<String>,
}

#[async_trait]
impl ExtractionModel for ProxyClient {
    #[instrument(skip(self, base64_image), fields(size_kb = base64_image.len() / 1024))]
    async fn extract(&self, base64_image: &str, mime_type: &str) -> Result<ExtractedContent> {
        let started = std::time::Instant::now();
        let out: ExtractedContent = self
            .invoke(&ProxyReq::Extract {
                base64_image,
                mime_type,
            })
            .await?;
        tracing::info!(latency_ms = started.elapsed().as_millis() as u64, "extraction relayed");
        Ok(out)
    }
}

#[async_trait]
impl AnswerModel for ProxyClient {
    #[instrument(skip(self, question, context, history), fields(context_kb = context.len() / 1024))]
    async fn answer(&self, question: &str, context: &str, history: &str) -> Result<String> {
        let out: QueryResp = self
            .invoke(&ProxyReq::Query {
                prompt: question,
                context,
                history,
            })
            .await?;
        Ok(out.answer.unwrap_or_default())
    }
}
