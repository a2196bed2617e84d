//! Mock 后端
//!
//! MockLlmClient 按提示词关键字分发固定回复，离线即可驱动完整生成流程；
//! ScriptedLlmClient 按队列弹出预设输出，用于需要逐步控制的测试。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::dialog::types::FunctionCall;
use crate::llm::traits::{ChatOutcome, LlmClient, LlmError, SamplingOptions};
use crate::schema::NormalizedTool;

/// 关键字分发的 Mock 客户端
#[derive(Default)]
pub struct MockLlmClient {
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用前注入固定延迟，用于观察并发行为
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn simulate(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn dispatch_text(system: &str) -> String {
        // 后续子任务的系统提示词同样含「生成一个任务请求」，先匹配更特异的标记
        if system.contains("当前任务类型") {
            "再帮我搜索一下周杰伦的热门歌曲".to_string()
        } else if system.contains("生成一个任务请求") {
            "请帮我查一下北京的天气，然后根据天气推荐几首适合的歌".to_string()
        } else if system.contains("API模拟器") {
            "```json\n{\"api_return\": {\"status\": \"ok\", \"data\": \"模拟结果\"}}\n```".to_string()
        } else if system.contains("分析当前对话的任务状态") {
            json!({
                "task_status": "completed",
                "response_message": "谢谢，顺便再帮我查一下明天的情况吧。",
                "related_apis": []
            })
            .to_string()
        } else {
            "好的，我来帮你处理。".to_string()
        }
    }

    /// 给首个工具按 required 参数造一组占位实参
    fn stub_arguments(tool: &NormalizedTool) -> Value {
        let mut arguments = Map::new();
        let properties = tool.parameters.get("properties").and_then(Value::as_object);
        let required = tool
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for entry in required {
            let Some(name) = entry.as_str() else { continue };
            let type_name = properties
                .and_then(|p| p.get(name))
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("string");
            let stub = match type_name {
                "number" | "integer" => json!(1),
                "boolean" => json!(true),
                "array" => json!([]),
                "object" => json!({}),
                _ => json!("北京"),
            };
            arguments.insert(name.to_string(), stub);
        }
        Value::Object(arguments)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        system: &str,
        _user: &str,
        _opts: &SamplingOptions,
    ) -> Result<String, LlmError> {
        self.simulate().await;
        Ok(Self::dispatch_text(system))
    }

    async fn complete_with_tools(
        &self,
        _system: &str,
        user: &str,
        tools: &[NormalizedTool],
        _opts: &SamplingOptions,
    ) -> Result<ChatOutcome, LlmError> {
        self.simulate().await;

        // 已有工具结果则收尾，否则调用列表里的第一个工具
        if user.contains("tool_responses") || tools.is_empty() {
            return Ok(ChatOutcome::text("根据查询结果，任务已完成。")
                .with_think("结果已经拿到，可以直接总结回答。"));
        }

        let tool = &tools[0];
        Ok(ChatOutcome {
            think: format!("需要调用 {} 来完成这一步。", tool.name),
            content: String::new(),
            tool_calls: vec![FunctionCall::new(
                tool.name.clone(),
                Self::stub_arguments(tool),
            )],
        })
    }
}

/// 脚本化客户端
///
/// 两个入口共享同一条脚本队列，按调用顺序弹出；队列耗尽返回不可重试
/// 错误，让测试立刻暴露脚本与实际调用次数的偏差。
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<ChatOutcome, LlmError>>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<ChatOutcome, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn from_outcomes(outcomes: Vec<ChatOutcome>) -> Self {
        Self::new(outcomes.into_iter().map(Ok).collect())
    }

    /// 已收到的 (system, user) 提示词对
    pub fn seen_prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn pop(&self, system: &str, user: &str) -> Result<ChatOutcome, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((system.to_string(), user.to_string()));
        }
        let mut script = self
            .script
            .lock()
            .map_err(|_| LlmError::Api("script mutex poisoned".to_string()))?;
        script
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::MalformedResponse("script exhausted".to_string())))
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        _opts: &SamplingOptions,
    ) -> Result<String, LlmError> {
        self.pop(system, user).map(|outcome| outcome.content)
    }

    async fn complete_with_tools(
        &self,
        system: &str,
        user: &str,
        _tools: &[NormalizedTool],
        _opts: &SamplingOptions,
    ) -> Result<ChatOutcome, LlmError> {
        self.pop(system, user)
    }
}
