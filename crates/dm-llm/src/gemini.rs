use crate::prompts::{answer_system_prompt, extraction_schema, EXTRACTION_PROMPT};
use crate::{AnswerModel, ExtractionModel};
use async_trait::async_trait;
use dm_core::ExtractedContent;
use dm_error::{DmError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,    // e.g. gemini-2.0-flash
    pub base_url: String, // default https://generativelanguage.googleapis.com/v1beta/models
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    cfg: GeminiConfig,
}

impl GeminiClient {
    pub fn new(cfg: GeminiConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.model
        )
    }

    async fn generate(&self, body: &GenerateReq) -> Result<String> {
        let resp = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.cfg.api_key.as_str())])
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
                provider: "gemini".to_string(),
                message: format!("status={} body={}", status, txt),
                retry_after: None,
            });
        }

        let data: GenerateResp = resp.json().await.map_err(|e| DmError::Network {
            operation: "http_request".to_string(),
            message: e.to_string(),
        })?;
        Ok(data.first_text().unwrap_or_default())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl Part {
    fn text(t: impl Into<String>) -> Self {
        Self {
            inline_data: None,
            text: Some(t.into()),
        }
    }
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReq {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Deserialize)]
struct RespPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Deserialize)]
struct RespCandidate {
    content: Option<RespContent>,
}

#[derive(Deserialize)]
struct GenerateResp {
    #[serde(default)]
    candidates: Vec<RespCandidate>,
}

impl GenerateResp {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

/// 解析模型返回的 JSON 文本
pub(crate) fn parse_extraction(text: &str) -> Result<ExtractedContent> {
    if text.trim().is_empty() {
        return Err(DmError::LlmService {
            provider: "gemini".to_string(),
            message: "No text response from Gemini".to_string(),
            retry_after: None,
        });
    }
    Ok(serde_json::from_str(text)?)
}

#[async_trait]
impl ExtractionModel for GeminiClient {
    #[instrument(skip(self, base64_image), fields(model = %self.cfg.model))]
    async fn extract(&self, base64_image: &str, mime_type: &str) -> Result<ExtractedContent> {
        let body = GenerateReq {
            contents: vec![Content {
                parts: vec![
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64_image.to_string(),
                        }),
                        text: None,
                    },
                    Part::text(EXTRACTION_PROMPT),
                ],
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
                response_schema: extraction_schema(),
            }),
        };
        let text = self.generate(&body).await?;
        parse_extraction(&text)
    }
}

#[async_trait]
impl AnswerModel for GeminiClient {
    #[instrument(skip(self, question, context, history), fields(model = %self.cfg.model))]
    async fn answer(&self, question: &str, context: &str, history: &str) -> Result<String> {
        let body = GenerateReq {
            contents: vec![Content {
                parts: vec![
                    Part::text(answer_system_prompt(context, history)),
                    Part::text(format!("User Question: {}", question)),
                ],
            }],
            generation_config: None,
        };
        self.generate(&body).await
    }
}
