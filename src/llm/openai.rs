//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。工具调用
//! 走 chat completions 的 tools 参数，模型返回的 arguments 是 JSON 字符串，
//! 需二次解析；该协议没有独立的推理通道，think 恒为空串。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::json;

use crate::dialog::types::FunctionCall;
use crate::llm::traits::{ChatOutcome, LlmClient, LlmError, SamplingOptions};
use crate::schema::NormalizedTool;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    /// 获取累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    fn to_openai_messages(&self, system: &str, user: &str) -> Vec<ChatCompletionRequestMessage> {
        vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.to_string())
                    .build()
                    .unwrap(),
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user.to_string())
                    .build()
                    .unwrap(),
            ),
        ]
    }

    /// wire 负载本身就是 OpenAI 函数包装时直接反序列化，否则从 canonical 组装
    fn to_openai_tools(&self, tools: &[NormalizedTool]) -> Vec<ChatCompletionTool> {
        tools
            .iter()
            .map(|tool| {
                serde_json::from_value::<ChatCompletionTool>(tool.wire.clone()).unwrap_or_else(
                    |_| ChatCompletionTool {
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionObject {
                            name: tool.name.clone(),
                            description: Some(tool.description.clone()),
                            parameters: Some(tool.parameters.clone()),
                            strict: None,
                        },
                    },
                )
            })
            .collect()
    }
}

fn map_openai_err(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;
    match err {
        OpenAIError::ApiError(e) => {
            let lowered = e.message.to_lowercase();
            if lowered.contains("rate limit") {
                LlmError::RateLimited
            } else if lowered.contains("api key") || lowered.contains("authentication") {
                LlmError::Auth(e.message)
            } else {
                LlmError::Api(e.message)
            }
        }
        OpenAIError::JSONDeserialize(e) => LlmError::MalformedResponse(e.to_string()),
        other => LlmError::Api(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        opts: &SamplingOptions,
    ) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(system, user))
            .temperature(opts.temperature)
            .max_tokens(opts.max_tokens)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_err)?;

        if let Some(usage) = &response.usage {
            self.usage.add(
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
            );
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    async fn complete_with_tools(
        &self,
        system: &str,
        user: &str,
        tools: &[NormalizedTool],
        opts: &SamplingOptions,
    ) -> Result<ChatOutcome, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(system, user))
            .tools(self.to_openai_tools(tools))
            .temperature(opts.temperature)
            .max_tokens(opts.max_tokens)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_err)?;

        if let Some(usage) = &response.usage {
            self.usage.add(
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
            );
        }

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::MalformedResponse("choices 为空".to_string()))?;

        let content = message.content.clone().unwrap_or_default();
        let mut tool_calls = Vec::new();
        if let Some(calls) = message.tool_calls {
            for call in calls {
                // arguments 解析失败按空参数处理，交给下游参数校验报错
                let parameters = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| json!({}));
                tool_calls.push(FunctionCall::new(call.function.name.clone(), parameters));
            }
        }

        Ok(ChatOutcome {
            think: String::new(),
            content,
            tool_calls,
        })
    }
}
