//! 助手代理
//!
//! 单步 ReAct 推理：把子任务对话与工具集发给模型，拿回思考 / 正文 /
//! 结构化调用三通道。若后端把调用以 JSON 写进正文而结构化列表为空，
//! 从正文里提取（仅解析已知工具，不造数）。任何后端失败（重试已在
//! 客户端层耗尽）都判该条对话作废。

use std::sync::Arc;

use crate::dialog::types::{FunctionCall, Turn};
use crate::error::EngineError;
use crate::llm::{LlmClient, SamplingOptions};
use crate::schema::NormalizedTool;

/// ReAct 系统提示词中列出的工具上限
const MAX_APIS_IN_PROMPT: usize = 10;

/// 单步产出
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantStep {
    pub think: String,
    pub content: String,
    pub function_calls: Vec<FunctionCall>,
}

/// 助手代理
pub struct AssistantAgent {
    llm: Arc<dyn LlmClient>,
    sampling: SamplingOptions,
}

impl AssistantAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sampling: SamplingOptions) -> Self {
        Self { llm, sampling }
    }

    /// 执行一次 ReAct 推理步
    pub async fn react_step(
        &self,
        subtask_conversation: &[Turn],
        tools: &[NormalizedTool],
    ) -> Result<AssistantStep, EngineError> {
        let system_prompt = format!(
            "你是一个AI助手，正在执行ReAct推理过程来帮助用户完成任务。\n\n\
             可用工具：\n{}\n\n\
             ReAct推理步骤：\n\
             1. **思考 (Think)**: 分析当前情况，确定下一步行动\n\
             2. **行动 (Act)**: 如果需要，调用合适的工具；如果不需要工具，直接回答\n\n\
             要求：\n\
             - 仔细分析用户需求和当前上下文\n\
             - 如果任务需要工具辅助，选择最合适的工具\n\
             - 如果任务已完成或不需要工具，提供最终答案\n\
             - 每次只关注当前任务，不要考虑其他任务",
            format_tools_for_system(tools)
        );

        let conversation_json = serde_json::to_string_pretty(subtask_conversation)
            .map_err(|e| EngineError::JsonParse(e.to_string()))?;
        let user_prompt = format!(
            "当前任务对话：\n{}\n\n请根据上下文进行思考并决定下一步行动：",
            conversation_json
        );

        let outcome = self
            .llm
            .complete_with_tools(&system_prompt, &user_prompt, tools, &self.sampling)
            .await
            .map_err(|e| EngineError::ReactStep(format!("模型调用在重试后仍失败: {}", e)))?;

        let mut function_calls = outcome.tool_calls;
        if function_calls.is_empty() {
            if let Some(call) = extract_inline_call(&outcome.content, tools) {
                tracing::debug!(tool = %call.name, "从正文中提取到内联调用");
                function_calls.push(call);
            }
        }

        tracing::debug!(
            calls = function_calls.len(),
            content_chars = outcome.content.chars().count(),
            "react step 完成"
        );

        Ok(AssistantStep {
            think: outcome.think,
            content: outcome.content,
            function_calls,
        })
    }
}

fn format_tools_for_system(tools: &[NormalizedTool]) -> String {
    tools
        .iter()
        .take(MAX_APIS_IN_PROMPT)
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 从正文中提取形如 {"name": 已知工具, "parameters": {...}} 的内联调用
fn extract_inline_call(content: &str, tools: &[NormalizedTool]) -> Option<FunctionCall> {
    let trimmed = content.trim();
    let candidate = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        }
    } else {
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if start >= end {
            return None;
        }
        trimmed[start..=end].trim()
    };

    let call: FunctionCall = serde_json::from_str(candidate).ok()?;
    if call.name.is_empty() || !tools.iter().any(|t| t.name == call.name) {
        return None;
    }
    if !call.parameters.is_object() {
        return None;
    }
    Some(call)
}
