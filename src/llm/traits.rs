//! LLM 后端抽象
//!
//! 两个入口：complete 走纯文本补全，complete_with_tools 走工具调用模式并
//! 返回思考 / 正文 / 结构化调用三通道。重试只发生在 RetryingLlmClient 这一层，
//! 编排层拿到的已经是重试耗尽后的最终结果。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::dialog::types::FunctionCall;
use crate::schema::NormalizedTool;

/// 后端错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("API 调用失败: {0}")]
    Api(String),

    #[error("请求超时")]
    Timeout,

    #[error("触发限流")]
    RateLimited,

    #[error("鉴权失败: {0}")]
    Auth(String),

    #[error("请求参数非法: {0}")]
    InvalidRequest(String),

    #[error("响应格式异常: {0}")]
    MalformedResponse(String),
}

impl LlmError {
    /// 瞬态错误（网络抖动、限流、超时）值得重试，其余立即失败
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Api(_) | LlmError::Timeout | LlmError::RateLimited
        )
    }
}

/// 采样参数
#[derive(Debug, Clone, Copy)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// 工具调用模式的三通道输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOutcome {
    /// 模型的内部推理文本，后端不支持时为空串
    pub think: String,
    pub content: String,
    pub tool_calls: Vec<FunctionCall>,
}

impl ChatOutcome {
    /// 纯文本输出
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// 带一条工具调用的输出
    pub fn call(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            tool_calls: vec![FunctionCall::new(name, parameters)],
            ..Self::default()
        }
    }

    pub fn with_think(mut self, think: impl Into<String>) -> Self {
        self.think = think.into();
        self
    }
}

/// LLM 客户端
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 纯文本补全
    async fn complete(
        &self,
        system: &str,
        user: &str,
        opts: &SamplingOptions,
    ) -> Result<String, LlmError>;

    /// 工具调用模式补全
    async fn complete_with_tools(
        &self,
        system: &str,
        user: &str,
        tools: &[NormalizedTool],
        opts: &SamplingOptions,
    ) -> Result<ChatOutcome, LlmError>;
}

/// 重试配置，指数退避
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    pub fn from_section(section: &crate::config::RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            initial_backoff: Duration::from_millis(section.initial_backoff_ms),
            max_backoff: Duration::from_millis(section.max_backoff_ms),
        }
    }
}

/// 重试包装
///
/// 只在 is_retryable 的错误上重试；永久性错误与耗尽后的最后一个错误
/// 原样向上返回。
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self
            .config
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.max_backoff);
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        opts: &SamplingOptions,
    ) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(system, user, opts).await {
                Ok(answer) => return Ok(answer),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_attempts => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "补全失败，退避后重试");
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete_with_tools(
        &self,
        system: &str,
        user: &str,
        tools: &[NormalizedTool],
        opts: &SamplingOptions,
    ) -> Result<ChatOutcome, LlmError> {
        let mut attempt = 0;
        loop {
            match self
                .inner
                .complete_with_tools(system, user, tools, opts)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_attempts => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "工具模式补全失败，退避后重试");
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 先失败 fail_times 次再成功
    struct FlakyClient {
        fail_times: u32,
        error: LlmError,
        calls: AtomicU32,
    }

    impl FlakyClient {
        fn new(fail_times: u32, error: LlmError) -> Self {
            Self {
                fail_times,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _opts: &SamplingOptions,
        ) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(self.error.clone())
            } else {
                Ok("ok".to_string())
            }
        }

        async fn complete_with_tools(
            &self,
            system: &str,
            user: &str,
            _tools: &[NormalizedTool],
            opts: &SamplingOptions,
        ) -> Result<ChatOutcome, LlmError> {
            self.complete(system, user, opts).await.map(ChatOutcome::text)
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let inner = Arc::new(FlakyClient::new(2, LlmError::Timeout));
        let client = RetryingLlmClient::new(inner.clone(), fast_retry(3));

        let answer = client
            .complete("s", "u", &SamplingOptions::default())
            .await
            .unwrap();
        assert_eq!(answer, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_last_error() {
        let inner = Arc::new(FlakyClient::new(10, LlmError::RateLimited));
        let client = RetryingLlmClient::new(inner.clone(), fast_retry(3));

        let err = client
            .complete("s", "u", &SamplingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let inner = Arc::new(FlakyClient::new(10, LlmError::Auth("bad key".to_string())));
        let client = RetryingLlmClient::new(inner.clone(), fast_retry(5));

        let err = client
            .complete("s", "u", &SamplingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_retryability() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::RateLimited.is_retryable());
        assert!(LlmError::Api("500".to_string()).is_retryable());
        assert!(!LlmError::Auth("x".to_string()).is_retryable());
        assert!(!LlmError::InvalidRequest("x".to_string()).is_retryable());
        assert!(!LlmError::MalformedResponse("x".to_string()).is_retryable());
    }
}
