//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Claude / Mock）

pub mod claude;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use claude::ClaudeClient;
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{
    ChatOutcome, LlmClient, LlmError, RetryConfig, RetryingLlmClient, SamplingOptions,
};

/// 按配置构建客户端并套上重试层
///
/// model_override 用于按角色替换模型（如工具模拟用更便宜的型号）；
/// 未知 provider 回落到 Mock 并告警，保证离线环境可用。
pub fn create_llm_client(section: &LlmSection, model_override: Option<&str>) -> Arc<dyn LlmClient> {
    let model = model_override.unwrap_or(&section.model);
    let inner: Arc<dyn LlmClient> = match section.provider.as_str() {
        "openai" => Arc::new(OpenAiClient::new(section.base_url.as_deref(), model, None)),
        "claude" => Arc::new(ClaudeClient::new(section.base_url.as_deref(), model, None)),
        "mock" => Arc::new(MockLlmClient::new()),
        other => {
            tracing::warn!(provider = other, "未知的 LLM provider，回落到 Mock");
            Arc::new(MockLlmClient::new())
        }
    };
    Arc::new(RetryingLlmClient::new(
        inner,
        RetryConfig::from_section(&section.retry),
    ))
}
