//! 工具代理
//!
//! 模拟 API 执行。正常路径按定义校验参数并用模型造出返回值；可恢复失败
//! （未知工具、参数校验不过、按 error_rate 注入的随机失败）一律以
//! status=error 的结构化结果写进对话，绝不向上抛。助手整步无调用且未达
//! 步数下限时，转而判定任务状态并模拟用户侧跟进，此路径的判定 JSON 非法
//! 属致命错误。

use std::sync::Arc;
use std::sync::OnceLock;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dialog::types::{FunctionCall, ToolResponse, Turn};
use crate::error::EngineError;
use crate::llm::{LlmClient, SamplingOptions};
use crate::schema::NormalizedTool;

/// 注入失败时的统一错误文案
const INJECTED_FAILURE_MESSAGE: &str = "API execution failed";

const SIMULATOR_SYSTEM_PROMPT: &str = "你是一个API模拟器，需要根据API定义和输入参数生成真实的API响应。

要求：
1. 响应要符合API的返回值定义
2. 数据要真实、合理，不要明显虚假
3. 如果是查询类API，返回相关的数据
4. 如果是操作类API，返回操作结果
5. 返回JSON格式的数据，不要其他说明
6. 数据要有适当的变化，不要总是相同的值

```json
{
    \"api_return\": your mock up api return
}
```";

const VERDICT_SYSTEM_PROMPT: &str = "你就是当前的用户，你需要分析当前对话的任务状态，模拟用户并生成相应的响应。

分析步骤：
1. 判断任务是否已经完成
2. 如果完成，生成后续的问题
3. 如果未完成，生成澄清请求

任务完成的判断标准：
- 用户的需求是否已经得到满足
- 助手的回复是否已经提供了完整的解决方案
- 最近的工具调用结果是否已经满足需求

响应要求：
- 如果任务完成：提供相关的后续建议，建议应该与可用的API功能相关
- 如果任务未完成：明确指出缺失的信息，并提供澄清

## 示例1：任务已完成
对话历史：
用户: 帮我查询北京今天的天气
助手: 我来帮您查询北京今天的天气。[调用: get_weather]
工具[get_weather]: {\"city\": \"北京\", \"weather\": \"晴\", \"temperature\": \"5-15°C\"}
助手: 北京今天天气晴朗，温度5-15°C。出行记得适当增减衣物。

分析返回：
```json
{
    \"task_status\": \"completed\",
    \"response_message\": \"谢谢！那明天的天气怎么样呢？需要带伞吗？\",
    \"related_apis\": [\"get_weather\"]
}
```

## 示例2：任务未完成
对话历史：
用户: 帮我订个酒店
助手: 请问您想在哪个城市入住，什么时间？

分析返回：
```json
{
    \"task_status\": \"needs_clarification\",
    \"response_message\": \"我想在杭州订酒店，大概这周五入住，住两晚。\"
}
```

返回JSON格式：
```json
{
    \"task_status\": \"completed\" 或 \"needs_clarification\",
    \"response_message\": \"模拟的用户回复\",
    \"related_apis\": [\"相关API名称，可选\"]
}
```";

/// 任务状态判定结果
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskVerdict {
    pub task_status: TaskStatus,
    pub response_message: String,
    #[serde(default)]
    pub related_apis: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    NeedsClarification,
}

/// 工具代理
pub struct ToolAgent {
    llm: Arc<dyn LlmClient>,
    sampling: SamplingOptions,
    error_rate: f64,
}

impl ToolAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sampling: SamplingOptions, error_rate: f64) -> Self {
        Self {
            llm,
            sampling,
            error_rate: error_rate.clamp(0.0, 1.0),
        }
    }

    /// 执行一次工具调用
    ///
    /// 返回 Err 只发生在造数的模型调用重试耗尽时，其余失败全部以
    /// Error 响应落进对话。
    pub async fn execute_call(
        &self,
        call: &FunctionCall,
        tools: &[NormalizedTool],
        rng: &mut StdRng,
    ) -> Result<ToolResponse, EngineError> {
        let Some(tool) = tools.iter().find(|t| t.name == call.name) else {
            return Ok(error_response(
                &call.name,
                format!("API '{}' not found", call.name),
            ));
        };

        if rng.gen_bool(self.error_rate) {
            tracing::debug!(tool = %tool.name, "注入随机执行失败");
            return Ok(error_response(&call.name, INJECTED_FAILURE_MESSAGE.to_string()));
        }

        if let Err(message) = validate_parameters(&call.parameters, &tool.parameters) {
            return Ok(error_response(&call.name, message));
        }

        let result = self.synthesize_result(tool, &call.parameters).await?;
        Ok(ToolResponse::Success {
            function: call.name.clone(),
            result,
        })
    }

    /// 无调用场景：判定任务状态并模拟用户侧跟进
    pub async fn follow_up(
        &self,
        conversation: &[Turn],
        tools: &[NormalizedTool],
    ) -> Result<ToolResponse, EngineError> {
        let verdict = self.analyze_task_status(conversation, tools).await?;
        tracing::debug!(status = ?verdict.task_status, "生成用户侧跟进");
        Ok(ToolResponse::FollowUp {
            message: verdict.response_message,
        })
    }

    /// 用模型按返回值定义造数
    ///
    /// 模型输出解析失败降级为 null 结果；仅重试耗尽才致命。
    async fn synthesize_result(
        &self,
        tool: &NormalizedTool,
        parameters: &Value,
    ) -> Result<Value, EngineError> {
        let api_info = json!({
            "name": tool.name,
            "description": tool.description,
            "parameters": parameters,
            "returns": tool.returns,
        });
        let user_prompt = format!(
            "API信息：\n{}\n\n请生成符合API定义的响应数据：",
            serde_json::to_string_pretty(&api_info).unwrap_or_default()
        );

        match self
            .llm
            .complete(SIMULATOR_SYSTEM_PROMPT, &user_prompt, &self.sampling)
            .await
        {
            Ok(answer) => {
                let extracted = extract_json(&answer);
                match serde_json::from_str::<Value>(&extracted) {
                    Ok(result) => Ok(result),
                    Err(e) => {
                        tracing::warn!(tool = %tool.name, error = %e, "模拟器输出不是合法 JSON，结果置空");
                        Ok(Value::Null)
                    }
                }
            }
            Err(e) if e.is_retryable() => Err(EngineError::ToolSimulation(format!(
                "模型调用在重试后仍失败: {}",
                e
            ))),
            Err(e) => {
                tracing::warn!(tool = %tool.name, error = %e, "模拟器调用失败，结果置空");
                Ok(Value::Null)
            }
        }
    }

    async fn analyze_task_status(
        &self,
        conversation: &[Turn],
        tools: &[NormalizedTool],
    ) -> Result<TaskVerdict, EngineError> {
        let conversation_json = serde_json::to_string_pretty(conversation)
            .map_err(|e| EngineError::JsonParse(e.to_string()))?;
        let api_info: Vec<Value> = tools.iter().map(|t| t.wire.clone()).collect();
        let user_prompt = format!(
            "对话历史：\n{}\n\n可用的API功能：\n{}\n\n请分析任务状态并生成相应的响应：",
            conversation_json,
            serde_json::to_string_pretty(&api_info).unwrap_or_default()
        );

        let answer = self
            .llm
            .complete(VERDICT_SYSTEM_PROMPT, &user_prompt, &self.sampling)
            .await?;

        let extracted = extract_json(&answer);
        serde_json::from_str::<TaskVerdict>(&extracted)
            .map_err(|e| EngineError::MalformedVerdict(format!("{}: {}", e, extracted)))
    }
}

fn error_response(function: &str, error: String) -> ToolResponse {
    ToolResponse::Error {
        function: function.to_string(),
        error,
        timestamp: Utc::now().to_rfc3339(),
    }
}

/// 校验调用参数：required 必须齐全，已提供的参数类型需与定义一致
fn validate_parameters(parameters: &Value, schema: &Value) -> Result<(), String> {
    let supplied = parameters.as_object();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for entry in required {
            let Some(name) = entry.as_str() else { continue };
            let present = supplied.map(|m| m.contains_key(name)).unwrap_or(false);
            if !present {
                return Err(format!("Missing required parameter: {}", name));
            }
        }
    }

    let (Some(supplied), Some(properties)) = (
        supplied,
        schema.get("properties").and_then(Value::as_object),
    ) else {
        return Ok(());
    };

    for (name, value) in supplied {
        let Some(expected) = properties
            .get(name)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        if !check_parameter_type(value, expected) {
            return Err(format!(
                "Invalid type for parameter {}: expected {}",
                name, expected
            ));
        }
    }
    Ok(())
}

/// 类型匹配表；number 接受任意 JSON 数值，integer 只接受整数，未知类型放行
fn check_parameter_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

static JSON_FENCE: OnceLock<Regex> = OnceLock::new();
static CODE_FENCE: OnceLock<Regex> = OnceLock::new();

/// 从可能带 Markdown 代码块的文本中提取 JSON 串
///
/// 依次尝试 ```json 围栏、以 { 或 [ 开头的裸围栏、首个 { 到末个 } 的
/// 区间；全不命中时原样返回修剪后的文本，是否合法交给调用方解析。
fn extract_json(response: &str) -> String {
    let json_fence =
        JSON_FENCE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").unwrap());
    if let Some(captures) = json_fence.captures(response) {
        return captures[1].trim().to_string();
    }

    let code_fence = CODE_FENCE.get_or_init(|| Regex::new(r"(?s)```\s*(.*?)\s*```").unwrap());
    if let Some(captures) = code_fence.captures(response) {
        let content = captures[1].trim();
        if content.starts_with('{') || content.starts_with('[') {
            return content.to_string();
        }
    }

    if let (Some(first), Some(last)) = (response.find('{'), response.rfind('}')) {
        if first < last {
            return response[first..=last].to_string();
        }
    }

    response.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    use crate::llm::{ChatOutcome, LlmError, ScriptedLlmClient};
    use crate::schema::{normalize, Dialect};
    use crate::tools::ToolDefinition;

    fn weather_tools() -> Vec<NormalizedTool> {
        let def = ToolDefinition::new("get_weather", "获取天气").with_parameters(json!({
            "type": "dict",
            "properties": {
                "city": {"type": "string"},
                "days": {"type": "int"},
                "detailed": {"type": "boolean"}
            },
            "required": ["city"]
        }));
        normalize(&[def], Dialect::Claude)
    }

    fn agent_with(script: Vec<Result<ChatOutcome, LlmError>>, error_rate: f64) -> ToolAgent {
        ToolAgent::new(
            Arc::new(ScriptedLlmClient::new(script)),
            SamplingOptions::default(),
            error_rate,
        )
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(99)
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_error_response() {
        let agent = agent_with(vec![], 0.0);
        let call = FunctionCall::new("no_such_api", json!({}));

        let response = agent
            .execute_call(&call, &weather_tools(), &mut rng())
            .await
            .unwrap();
        match response {
            ToolResponse::Error { function, error, .. } => {
                assert_eq!(function, "no_such_api");
                assert_eq!(error, "API 'no_such_api' not found");
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_injected_failure_at_full_error_rate() {
        let agent = agent_with(vec![], 1.0);
        let call = FunctionCall::new("get_weather", json!({"city": "北京"}));

        let response = agent
            .execute_call(&call, &weather_tools(), &mut rng())
            .await
            .unwrap();
        match response {
            ToolResponse::Error { error, .. } => assert_eq!(error, INJECTED_FAILURE_MESSAGE),
            other => panic!("expected injected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_required_parameter_is_recoverable_error() {
        let agent = agent_with(vec![], 0.0);
        let call = FunctionCall::new("get_weather", json!({"days": 3}));

        let response = agent
            .execute_call(&call, &weather_tools(), &mut rng())
            .await
            .unwrap();
        match response {
            ToolResponse::Error { error, .. } => {
                assert_eq!(error, "Missing required parameter: city");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_parameter_type_is_recoverable_error() {
        let agent = agent_with(vec![], 0.0);
        let call = FunctionCall::new("get_weather", json!({"city": 42}));

        let response = agent
            .execute_call(&call, &weather_tools(), &mut rng())
            .await
            .unwrap();
        match response {
            ToolResponse::Error { error, .. } => {
                assert!(error.contains("Invalid type for parameter city"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_successful_call_keeps_simulator_envelope() {
        let reply = "```json\n{\"api_return\": {\"weather\": \"晴\", \"temperature\": 22}}\n```";
        let agent = agent_with(vec![Ok(ChatOutcome::text(reply))], 0.0);
        let call = FunctionCall::new("get_weather", json!({"city": "北京", "days": 2}));

        let response = agent
            .execute_call(&call, &weather_tools(), &mut rng())
            .await
            .unwrap();
        match response {
            ToolResponse::Success { function, result } => {
                assert_eq!(function, "get_weather");
                assert_eq!(result["api_return"]["weather"], "晴");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparseable_simulator_output_degrades_to_null() {
        let agent = agent_with(vec![Ok(ChatOutcome::text("今天天气不错"))], 0.0);
        let call = FunctionCall::new("get_weather", json!({"city": "北京"}));

        let response = agent
            .execute_call(&call, &weather_tools(), &mut rng())
            .await
            .unwrap();
        match response {
            ToolResponse::Success { result, .. } => assert_eq!(result, Value::Null),
            other => panic!("expected null-result success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_exhaustion_in_simulator_is_fatal() {
        let agent = agent_with(vec![Err(LlmError::Timeout)], 0.0);
        let call = FunctionCall::new("get_weather", json!({"city": "北京"}));

        let err = agent
            .execute_call(&call, &weather_tools(), &mut rng())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ToolSimulation(_)));
    }

    #[tokio::test]
    async fn test_follow_up_parses_both_verdicts() {
        let completed = json!({
            "task_status": "completed",
            "response_message": "谢谢！再帮我看看明天的吧。",
            "related_apis": ["get_weather"]
        })
        .to_string();
        let agent = agent_with(vec![Ok(ChatOutcome::text(completed))], 0.0);
        let conversation = vec![Turn::user("查天气")];

        let response = agent
            .follow_up(&conversation, &weather_tools())
            .await
            .unwrap();
        match response {
            ToolResponse::FollowUp { message } => {
                assert_eq!(message, "谢谢！再帮我看看明天的吧。");
            }
            other => panic!("expected follow_up, got {:?}", other),
        }

        let clarification = json!({
            "task_status": "needs_clarification",
            "response_message": "我要查的是上海，不是北京。"
        })
        .to_string();
        let agent = agent_with(vec![Ok(ChatOutcome::text(clarification))], 0.0);
        let response = agent
            .follow_up(&conversation, &weather_tools())
            .await
            .unwrap();
        assert!(matches!(response, ToolResponse::FollowUp { .. }));
    }

    #[tokio::test]
    async fn test_malformed_verdict_is_fatal() {
        let missing_field = json!({"task_status": "completed"}).to_string();
        let agent = agent_with(vec![Ok(ChatOutcome::text(missing_field))], 0.0);
        let conversation = vec![Turn::user("查天气")];

        let err = agent
            .follow_up(&conversation, &weather_tools())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedVerdict(_)));

        let unknown_status = json!({
            "task_status": "half_done",
            "response_message": "嗯"
        })
        .to_string();
        let agent = agent_with(vec![Ok(ChatOutcome::text(unknown_status))], 0.0);
        let err = agent
            .follow_up(&conversation, &weather_tools())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedVerdict(_)));
    }

    #[test]
    fn test_check_parameter_type_matrix() {
        assert!(check_parameter_type(&json!("x"), "string"));
        assert!(!check_parameter_type(&json!(1), "string"));
        assert!(check_parameter_type(&json!(1), "integer"));
        assert!(!check_parameter_type(&json!(1.5), "integer"));
        assert!(check_parameter_type(&json!(1), "number"));
        assert!(check_parameter_type(&json!(1.5), "number"));
        assert!(check_parameter_type(&json!(true), "boolean"));
        assert!(check_parameter_type(&json!([1]), "array"));
        assert!(check_parameter_type(&json!({}), "object"));
        // 未知类型名放行
        assert!(check_parameter_type(&json!("anything"), "datetime"));
    }

    #[test]
    fn test_validate_accepts_optional_omission_and_extra_params() {
        let tools = weather_tools();
        let schema = &tools[0].parameters;

        assert!(validate_parameters(&json!({"city": "北京"}), schema).is_ok());
        // 未声明的参数不校验类型
        assert!(validate_parameters(&json!({"city": "北京", "units": "c"}), schema).is_ok());
        assert!(validate_parameters(&json!({"city": "北京", "detailed": "yes"}), schema).is_err());
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(
            extract_json("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(extract_json("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(
            extract_json("前缀 {\"a\": {\"b\": 2}} 后缀"),
            "{\"a\": {\"b\": 2}}"
        );
        assert_eq!(extract_json("  纯文本  "), "纯文本");
        // 裸围栏里不是 JSON 时继续向后找花括号
        assert_eq!(extract_json("```\nprint('hi')\n``` {\"a\": 1}"), "{\"a\": 1}");
    }
}
