//! Anthropic Messages API 客户端
//!
//! reqwest 直连 /v1/messages。开启 thinking 后响应由 thinking / text /
//! tool_use 三种内容块组成，逐块归并为三通道输出；tool_use 块的 input
//! 已是结构化 JSON，无需二次解析。

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::dialog::types::FunctionCall;
use crate::llm::traits::{ChatOutcome, LlmClient, LlmError, SamplingOptions};
use crate::schema::NormalizedTool;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// 推理预算（token），与 max_tokens 分开计
const THINKING_BUDGET_TOKENS: u32 = 8192;

/// Claude 客户端
pub struct ClaudeClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl ClaudeClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .unwrap_or_default();

        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    async fn send(&self, body: Value) -> Result<Value, LlmError> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(match status.as_u16() {
                401 | 403 => LlmError::Auth(message),
                429 => LlmError::RateLimited,
                408 | 504 => LlmError::Timeout,
                400 => LlmError::InvalidRequest(message),
                _ => LlmError::Api(message),
            });
        }
        Ok(payload)
    }

    fn parse_blocks(payload: &Value) -> ChatOutcome {
        let mut outcome = ChatOutcome::default();
        let Some(blocks) = payload["content"].as_array() else {
            return outcome;
        };
        for block in blocks {
            match block["type"].as_str().unwrap_or("") {
                "thinking" => outcome
                    .think
                    .push_str(block["thinking"].as_str().unwrap_or("")),
                "text" => outcome.content.push_str(block["text"].as_str().unwrap_or("")),
                "tool_use" => outcome.tool_calls.push(FunctionCall::new(
                    block["name"].as_str().unwrap_or("").to_string(),
                    block["input"].clone(),
                )),
                other => {
                    tracing::warn!(block_type = other, "忽略未知的内容块类型");
                }
            }
        }
        outcome
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        opts: &SamplingOptions,
    ) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });
        let payload = self.send(body).await?;
        Ok(Self::parse_blocks(&payload).content)
    }

    async fn complete_with_tools(
        &self,
        system: &str,
        user: &str,
        tools: &[NormalizedTool],
        opts: &SamplingOptions,
    ) -> Result<ChatOutcome, LlmError> {
        let wire_tools: Vec<Value> = tools.iter().map(|t| t.wire.clone()).collect();
        let body = json!({
            "model": self.model,
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
            "thinking": {"type": "enabled", "budget_tokens": THINKING_BUDGET_TOKENS},
            "system": system,
            "messages": [{"role": "user", "content": user}],
            "tools": wire_tools,
        });
        let payload = self.send(body).await?;
        Ok(Self::parse_blocks(&payload))
    }
}
