//! 通用 API 定义
//!
//! 池中的定义与任何模型方言无关，parameters / returns 均为 JSON-Schema
//! 风格的原始结构，发给模型前由 schema 模块按方言规整。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一条 API 定义
///
/// 引擎对定义只读：一旦被采样进某条对话，其内容在该对话的整个生成
/// 周期内保持不变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// 原始名称，可能包含非法字符，发送前会被清洗
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 参数定义，{type, properties, required} 结构
    #[serde(default = "empty_schema")]
    pub parameters: Value,
    /// 返回值定义，工具代理据此造数
    #[serde(default = "empty_schema")]
    pub returns: Value,
}

fn empty_schema() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_schema(),
            returns: empty_schema(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_returns(mut self, returns: Value) -> Self {
        self.returns = returns;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_deserializes_with_missing_fields() {
        let def: ToolDefinition = serde_json::from_value(json!({
            "name": "get_weather"
        }))
        .unwrap();

        assert_eq!(def.name, "get_weather");
        assert_eq!(def.description, "");
        assert_eq!(def.parameters, json!({}));
        assert_eq!(def.returns, json!({}));
    }

    #[test]
    fn test_builder_keeps_schemas() {
        let def = ToolDefinition::new("search_music", "搜索音乐")
            .with_parameters(json!({
                "type": "dict",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }))
            .with_returns(json!({"type": "list"}));

        assert_eq!(def.parameters["required"][0], "query");
        assert_eq!(def.returns["type"], "list");
    }
}
