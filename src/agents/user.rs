//! 用户代理
//!
//! 为每个子任务生成开场请求。首个子任务自成一体，失败时退回兜底语；
//! 后续子任务按 related_probability 掷硬币决定是否延续此前话题（相关时
//! 把剥离了 think 的全局对话喂给模型），失败直接向上抛，使该条对话作废。

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value;

use crate::dialog::types::Turn;
use crate::error::EngineError;
use crate::llm::{LlmClient, SamplingOptions};
use crate::schema::NormalizedTool;

/// 开场请求生成失败时的兜底语
const FALLBACK_OPENING_QUERY: &str = "请帮我处理一个任务";
/// 提示词中列出的候选 API 上限
const MAX_APIS_IN_PROMPT: usize = 5;

const OPENING_SYSTEM_PROMPT: &str = "你是一个用户，需要生成一个任务请求。

要求：
1. 生成一个明确、具体的任务请求
2. 任务应该可以通过给定的API来完成
3. 需要提供接口所需要的所有参数
4. 使用自然、口语化的表达
5. 任务应该有一定的复杂度，可能需要多步操作
6. 直接返回任务内容，不需要JSON格式

示例：
- \"请帮我查找北京明天的天气，然后根据天气情况推荐合适的活动\"
- \"我需要搜索关于Python编程的资料，并整理成一个学习计划\"
- \"帮我查看我的日程安排，然后创建一个新的会议\"";

/// 用户代理
pub struct UserAgent {
    llm: Arc<dyn LlmClient>,
    sampling: SamplingOptions,
    related_probability: f64,
}

impl UserAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sampling: SamplingOptions, related_probability: f64) -> Self {
        Self {
            llm,
            sampling,
            related_probability: related_probability.clamp(0.0, 1.0),
        }
    }

    /// 生成第 subtask_index 个子任务的用户请求
    pub async fn next_query(
        &self,
        subtask_index: usize,
        global_conversation: &[Turn],
        tools: &[NormalizedTool],
        rng: &mut StdRng,
    ) -> Result<String, EngineError> {
        if subtask_index == 0 {
            Ok(self.opening_query(tools).await)
        } else {
            self.followup_query(global_conversation, tools, rng).await
        }
    }

    async fn opening_query(&self, tools: &[NormalizedTool]) -> String {
        let user_prompt = format!(
            "可用API：\n{}\n\n请生成第一个子任务：",
            format_apis_for_prompt(tools)
        );

        match self
            .llm
            .complete(OPENING_SYSTEM_PROMPT, &user_prompt, &self.sampling)
            .await
        {
            Ok(answer) => clean_query(&answer),
            Err(e) => {
                tracing::warn!(error = %e, "开场请求生成失败，使用兜底语");
                FALLBACK_OPENING_QUERY.to_string()
            }
        }
    }

    async fn followup_query(
        &self,
        global_conversation: &[Turn],
        tools: &[NormalizedTool],
        rng: &mut StdRng,
    ) -> Result<String, EngineError> {
        let is_related = rng.gen_bool(self.related_probability);
        let (task_type, task_instruction) = if is_related {
            ("相关任务", "生成与之前任务相关的后续任务")
        } else {
            ("独立任务", "生成一个完全独立的新任务，不要考虑之前的任务内容")
        };

        let system_prompt = format!(
            "你是一个用户，需要生成一个任务请求。\n\n\
             当前任务类型：{}\n\
             任务要求：{}\n\n\
             要求：\n\
             1. 生成明确、具体的任务请求\n\
             2. 任务应该可以通过给定的API完成\n\
             3. 使用自然、口语化的表达\n\
             4. 直接根据提供的API提供任务内容，不需要JSON格式",
            task_type, task_instruction
        );

        let api_info = format_apis_for_prompt(tools);
        let user_prompt = if is_related {
            let context = strip_think(global_conversation);
            format!(
                "之前的对话情况：\n{}\n\n可用API：\n{}\n\n请生成子任务：",
                serde_json::to_string_pretty(&context).unwrap_or_default(),
                api_info
            )
        } else {
            format!("可用API：\n{}\n\n请生成子任务：", api_info)
        };

        tracing::debug!(is_related, "生成后续子任务请求");

        let answer = self
            .llm
            .complete(&system_prompt, &user_prompt, &self.sampling)
            .await
            .map_err(|e| EngineError::QueryGeneration(format!("后续子任务请求生成失败: {}", e)))?;
        Ok(clean_query(&answer))
    }
}

fn format_apis_for_prompt(tools: &[NormalizedTool]) -> String {
    tools
        .iter()
        .take(MAX_APIS_IN_PROMPT)
        .enumerate()
        .map(|(i, t)| format!("{}. {}: {}", i + 1, t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 序列化此前对话供提示词引用，剥离助手轮的内部思考
fn strip_think(turns: &[Turn]) -> Value {
    let stripped: Vec<Value> = turns
        .iter()
        .map(|turn| {
            let mut value = serde_json::to_value(turn).unwrap_or(Value::Null);
            if let Some(map) = value.as_object_mut() {
                map.remove("think");
            }
            value
        })
        .collect();
    Value::Array(stripped)
}

/// 去掉模型爱加的首尾引号
fn clean_query(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}
