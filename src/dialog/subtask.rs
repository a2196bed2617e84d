//! 子任务 ReAct 循环
//!
//! 终止只有两种：助手整步无调用且已达步数下限（自然终止），或步数预算
//! 耗尽（正常收尾，不算错误）。无调用但未达下限时由工具代理模拟用户侧
//! 跟进，迫使对话继续。

use rand::rngs::StdRng;

use crate::agents::{AssistantAgent, ToolAgent};
use crate::dialog::types::Turn;
use crate::error::EngineError;
use crate::schema::NormalizedTool;

/// 子任务运行器，借用引擎持有的代理
pub struct SubtaskRunner<'a> {
    pub assistant: &'a AssistantAgent,
    pub tool: &'a ToolAgent,
    pub max_react_steps: usize,
    pub min_forced_steps: usize,
}

impl SubtaskRunner<'_> {
    /// 以用户请求开场，驱动完整的 ReAct 循环，返回该子任务的全部轮次
    pub async fn run(
        &self,
        user_query: String,
        tools: &[NormalizedTool],
        rng: &mut StdRng,
    ) -> Result<Vec<Turn>, EngineError> {
        let mut conversation = vec![Turn::user(user_query)];

        for step in 0..self.max_react_steps {
            let output = self.assistant.react_step(&conversation, tools).await?;
            let function_calls = output.function_calls;
            conversation.push(Turn::Assistant {
                think: output.think,
                content: output.content,
                function_calls: function_calls.clone(),
            });

            if function_calls.is_empty() && step >= self.min_forced_steps {
                tracing::debug!(step, "子任务自然终止");
                break;
            }

            let mut tool_responses = Vec::new();
            if function_calls.is_empty() {
                // 未达步数下限：模拟用户跟进，工具轮不能为空
                tool_responses.push(self.tool.follow_up(&conversation, tools).await?);
            }
            for call in &function_calls {
                tool_responses.push(self.tool.execute_call(call, tools, rng).await?);
            }
            conversation.push(Turn::Tool { tool_responses });

            tracing::debug!(step, turns = conversation.len(), "react 步完成");
        }

        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;
    use serde_json::json;

    use super::*;
    use crate::dialog::types::{count_react_steps, ToolResponse};
    use crate::llm::{ChatOutcome, SamplingOptions, ScriptedLlmClient};
    use crate::schema::{normalize, Dialect};
    use crate::tools::ToolDefinition;

    fn tools() -> Vec<NormalizedTool> {
        normalize(
            &[ToolDefinition::new("get_weather", "获取天气").with_parameters(json!({
                "type": "dict",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }))],
            Dialect::Claude,
        )
    }

    fn runner_parts(
        script: Vec<ChatOutcome>,
        error_rate: f64,
    ) -> (AssistantAgent, ToolAgent) {
        let client = Arc::new(ScriptedLlmClient::from_outcomes(script));
        (
            AssistantAgent::new(client.clone(), SamplingOptions::default()),
            ToolAgent::new(client, SamplingOptions::default(), error_rate),
        )
    }

    #[tokio::test]
    async fn test_natural_termination_after_floor() {
        // 步 0：调用；步 1：无调用且 step >= 下限，自然终止
        let script = vec![
            ChatOutcome::call("get_weather", json!({"city": "北京"})).with_think("先查天气"),
            ChatOutcome::text("```json\n{\"api_return\": {\"weather\": \"晴\"}}\n```"),
            ChatOutcome::text("北京今天晴。").with_think("结果已拿到"),
        ];
        let (assistant, tool) = runner_parts(script, 0.0);
        let runner = SubtaskRunner {
            assistant: &assistant,
            tool: &tool,
            max_react_steps: 5,
            min_forced_steps: 1,
        };
        let mut rng = StdRng::seed_from_u64(3);

        let turns = runner
            .run("查一下北京天气".to_string(), &tools(), &mut rng)
            .await
            .unwrap();

        // user / assistant(调用) / tool / assistant(收尾)
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role(), "user");
        assert_eq!(turns[1].role(), "assistant");
        assert_eq!(turns[2].role(), "tool");
        assert_eq!(turns[3].role(), "assistant");
        match &turns[3] {
            Turn::Assistant { function_calls, .. } => assert!(function_calls.is_empty()),
            other => panic!("expected assistant turn, got {:?}", other),
        }
        assert_eq!(count_react_steps(&turns), 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_not_an_error() {
        // 每步都发调用，预算 2 步耗尽后正常返回
        let script = vec![
            ChatOutcome::call("get_weather", json!({"city": "北京"})),
            ChatOutcome::text("{\"api_return\": 1}"),
            ChatOutcome::call("get_weather", json!({"city": "上海"})),
            ChatOutcome::text("{\"api_return\": 2}"),
        ];
        let (assistant, tool) = runner_parts(script, 0.0);
        let runner = SubtaskRunner {
            assistant: &assistant,
            tool: &tool,
            max_react_steps: 2,
            min_forced_steps: 1,
        };
        let mut rng = StdRng::seed_from_u64(3);

        let turns = runner
            .run("连续查两个城市".to_string(), &tools(), &mut rng)
            .await
            .unwrap();
        assert_eq!(count_react_steps(&turns), 2);
        assert_eq!(turns.len(), 5);
    }

    #[tokio::test]
    async fn test_no_call_below_floor_forces_follow_up() {
        let verdict = json!({
            "task_status": "needs_clarification",
            "response_message": "我要查的是明天的天气。"
        })
        .to_string();
        // 步 0：无调用但未达下限 -> follow_up；步 1：无调用且达下限 -> 终止
        let script = vec![
            ChatOutcome::text("请问您要查哪天的天气？"),
            ChatOutcome::text(verdict),
            ChatOutcome::text("好的，明天北京有小雨。"),
        ];
        let (assistant, tool) = runner_parts(script, 0.0);
        let runner = SubtaskRunner {
            assistant: &assistant,
            tool: &tool,
            max_react_steps: 3,
            min_forced_steps: 1,
        };
        let mut rng = StdRng::seed_from_u64(3);

        let turns = runner
            .run("查天气".to_string(), &tools(), &mut rng)
            .await
            .unwrap();

        assert_eq!(turns.len(), 4);
        match &turns[2] {
            Turn::Tool { tool_responses } => {
                assert_eq!(tool_responses.len(), 1);
                match &tool_responses[0] {
                    ToolResponse::FollowUp { message } => {
                        assert_eq!(message, "我要查的是明天的天气。");
                    }
                    other => panic!("expected follow_up, got {:?}", other),
                }
            }
            other => panic!("expected tool turn, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_calls_in_one_step_keep_order() {
        let two_calls = ChatOutcome {
            think: "两个城市一起查".to_string(),
            content: String::new(),
            tool_calls: vec![
                crate::dialog::types::FunctionCall::new("get_weather", json!({"city": "北京"})),
                crate::dialog::types::FunctionCall::new("nonexistent", json!({})),
            ],
        };
        let script = vec![
            two_calls,
            // 只有第一条调用会造数，第二条是未知工具错误
            ChatOutcome::text("{\"api_return\": {\"ok\": true}}"),
            ChatOutcome::text("搞定。"),
        ];
        let (assistant, tool) = runner_parts(script, 0.0);
        let runner = SubtaskRunner {
            assistant: &assistant,
            tool: &tool,
            max_react_steps: 3,
            min_forced_steps: 0,
        };
        let mut rng = StdRng::seed_from_u64(3);

        let turns = runner
            .run("查北京和火星的天气".to_string(), &tools(), &mut rng)
            .await
            .unwrap();

        match &turns[2] {
            Turn::Tool { tool_responses } => {
                assert_eq!(tool_responses.len(), 2);
                assert!(matches!(tool_responses[0], ToolResponse::Success { .. }));
                match &tool_responses[1] {
                    ToolResponse::Error { function, .. } => assert_eq!(function, "nonexistent"),
                    other => panic!("expected error, got {:?}", other),
                }
            }
            other => panic!("expected tool turn, got {:?}", other),
        }
    }
}
