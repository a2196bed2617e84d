//! 对话数据模型
//!
//! Turn 以 role 打标签做序列化，与落盘的 JSON 逐字段对应。轮次在
//! 全局对话中的插入顺序即时间顺序，组装完成后不再修改。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GenerationSection;

/// 助手发起的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

fn empty_parameters() -> Value {
    Value::Object(serde_json::Map::new())
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

/// 工具轮中的单条响应，按 status 区分三种形态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResponse {
    /// 模拟执行成功
    Success { function: String, result: Value },
    /// 可恢复失败：未知工具、参数校验不过或注入的随机失败
    Error {
        function: String,
        error: String,
        timestamp: String,
    },
    /// 无调用时模拟的用户侧跟进
    FollowUp { message: String },
}

/// 对话轮次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    User {
        content: String,
    },
    Assistant {
        think: String,
        content: String,
        function_calls: Vec<FunctionCall>,
    },
    Tool {
        tool_responses: Vec<ToolResponse>,
    },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Turn::User { .. } => "user",
            Turn::Assistant { .. } => "assistant",
            Turn::Tool { .. } => "tool",
        }
    }
}

/// 子任务内的 ReAct 步数（助手轮数）
pub fn count_react_steps(turns: &[Turn]) -> usize {
    turns
        .iter()
        .filter(|t| matches!(t, Turn::Assistant { .. }))
        .count()
}

/// 子任务内发起的工具调用总数
pub fn count_tool_calls(turns: &[Turn]) -> usize {
    turns
        .iter()
        .map(|t| match t {
            Turn::Assistant { function_calls, .. } => function_calls.len(),
            _ => 0,
        })
        .sum()
}

/// 单个子任务的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskRecord {
    pub subtask_id: usize,
    pub turns: usize,
    pub react_steps: usize,
    pub tool_calls_used: usize,
}

/// 成品对话的元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogMetadata {
    pub num_subtasks: usize,
    pub total_turns: usize,
    pub subtask_breakdown: Vec<SubtaskRecord>,
    /// 生成该对话时的参数快照
    pub generation_config: GenerationSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity_score: Option<f64>,
}

/// 一条完成的多子任务对话
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialog {
    pub dialog_id: String,
    pub dialog_type: String,
    /// 发给模型的方言负载，原样存档
    pub api_candidates: Vec<Value>,
    pub global_conversation: Vec<Turn>,
    pub metadata: DialogMetadata,
}

/// 由会话内容派生对话 ID
///
/// 只要求同内容同 ID，不要求全局唯一，去重在下游处理。
pub fn content_hash_id(turns: &[Turn]) -> String {
    let serialized = serde_json::to_string(turns).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("multi_subtask_{}", hasher.finish() % 1_000_000)
}
