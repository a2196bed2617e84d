//! 方言规整
//!
//! 同一份 API 定义按目标模型方言渲染成 wire 负载，同时保留递归规整后的
//! canonical 视图（parameters / returns）供工具代理做参数校验与返回值造数。
//! 全部为纯函数：相同输入必产生相同输出。

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::EngineError;
use crate::tools::ToolDefinition;

/// 名称清洗失败时的兜底名
const DEFAULT_TOOL_NAME: &str = "tool";
/// 方言对工具名的长度上限
const MAX_TOOL_NAME_LEN: usize = 128;

/// 目标模型方言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// name / description / input_schema 平铺，顶层 returns 与 required 丢弃
    Claude,
    /// {"type":"function","function":{...}} 包装，逐参数浅投影
    OpenAi,
}

impl FromStr for Dialect {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Dialect::Claude),
            "openai" => Ok(Dialect::OpenAi),
            other => Err(EngineError::UnsupportedDialect(other.to_string())),
        }
    }
}

/// 规整后的工具
///
/// canonical 字段给引擎内部用，wire 是发给模型的最终负载，也会原样
/// 存入成品对话的 api_candidates。
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTool {
    pub name: String,
    pub description: String,
    /// 递归规整后的参数定义，properties / required 等字段全部保留
    pub parameters: Value,
    /// 递归规整后的返回值定义
    pub returns: Value,
    /// 按方言渲染的负载
    pub wire: Value,
}

static DISALLOWED_CHARS: OnceLock<Regex> = OnceLock::new();
static UNDERSCORE_RUNS: OnceLock<Regex> = OnceLock::new();
static DASH_RUNS: OnceLock<Regex> = OnceLock::new();

/// 清洗工具名，输出保证匹配 ^[A-Za-z0-9_-]{1,128}$
pub fn sanitize_tool_name(name: &str) -> String {
    let disallowed =
        DISALLOWED_CHARS.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());
    let underscores = UNDERSCORE_RUNS.get_or_init(|| Regex::new(r"_{2,}").unwrap());
    let dashes = DASH_RUNS.get_or_init(|| Regex::new(r"-{2,}").unwrap());

    let replaced = disallowed.replace_all(name, "_");
    let collapsed = underscores.replace_all(&replaced, "_");
    let collapsed = dashes.replace_all(&collapsed, "-");
    let stripped = collapsed.trim_matches(|c| c == '_' || c == '-');

    let mut sanitized = if stripped.is_empty() {
        DEFAULT_TOOL_NAME.to_string()
    } else {
        stripped.to_string()
    };
    sanitized.truncate(MAX_TOOL_NAME_LEN);
    sanitized
}

fn remap_type_name(name: &str) -> &str {
    match name {
        "dict" => "object",
        "int" | "float" => "number",
        "list" => "array",
        other => other,
    }
}

/// 递归规整类型名
///
/// 只改写值为字符串的 "type" 字段（dict→object、int|float→number、
/// list→array），其余字段原样下探，数组逐项处理。
pub fn remap_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut converted = Map::with_capacity(map.len());
            for (key, value) in map {
                if key == "type" {
                    if let Value::String(s) = value {
                        converted.insert(key.clone(), Value::String(remap_type_name(s).to_string()));
                    } else {
                        converted.insert(key.clone(), value.clone());
                    }
                } else {
                    converted.insert(key.clone(), remap_schema(value));
                }
            }
            Value::Object(converted)
        }
        Value::Array(items) => Value::Array(items.iter().map(remap_schema).collect()),
        other => other.clone(),
    }
}

/// 将一组定义规整为目标方言的工具集
pub fn normalize(definitions: &[ToolDefinition], dialect: Dialect) -> Vec<NormalizedTool> {
    definitions
        .iter()
        .map(|def| {
            let name = sanitize_tool_name(&def.name);
            let parameters = remap_schema(&def.parameters);
            let returns = remap_schema(&def.returns);
            let wire = match dialect {
                Dialect::Claude => claude_wire(def, &name, &parameters),
                Dialect::OpenAi => openai_wire(def, &name),
            };
            NormalizedTool {
                name,
                description: def.description.clone(),
                parameters,
                returns,
                wire,
            }
        })
        .collect()
}

fn claude_wire(def: &ToolDefinition, name: &str, parameters: &Value) -> Value {
    json!({
        "name": name,
        "description": def.description,
        "input_schema": parameters,
    })
}

/// OpenAI 函数包装：逐参数浅投影，仅透传 description/default/enum/format
fn openai_wire(def: &ToolDefinition, name: &str) -> Value {
    let mut properties = Map::new();
    if let Some(props) = def.parameters.get("properties").and_then(Value::as_object) {
        for (param_name, param_info) in props {
            let mut projected = Map::new();
            let type_name = param_info
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("string");
            projected.insert(
                "type".to_string(),
                Value::String(remap_type_name(type_name).to_string()),
            );
            for key in ["description", "default", "enum", "format"] {
                if let Some(extra) = param_info.get(key) {
                    projected.insert(key.to_string(), extra.clone());
                }
            }
            properties.insert(param_name.clone(), Value::Object(projected));
        }
    }
    let required = def
        .parameters
        .get("required")
        .cloned()
        .unwrap_or_else(|| json!([]));

    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": def.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        }
    })
}
