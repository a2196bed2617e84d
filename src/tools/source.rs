//! 工具来源
//!
//! 批量生成每条对话前从来源随机抽取一组定义。抽样除内部使用计数外
//! 无任何副作用，计数用于离线分析池内分布是否均匀。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::json;

use crate::error::EngineError;
use crate::tools::ToolDefinition;

/// 定义抽样接口
pub trait ToolSource: Send + Sync {
    /// 随机抽取 count 条定义，不足时返回全部
    fn sample(&self, count: usize, rng: &mut StdRng) -> Vec<ToolDefinition>;
}

/// 内存工具池
pub struct StaticToolPool {
    tools: Vec<ToolDefinition>,
    usage: Mutex<HashMap<String, u64>>,
}

impl StaticToolPool {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// 从 JSON 文件加载定义数组
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("读取 {} 失败: {}", path.display(), e)))?;
        let tools: Vec<ToolDefinition> =
            serde_json::from_str(&raw).map_err(|e| EngineError::JsonParse(e.to_string()))?;
        tracing::info!(path = %path.display(), count = tools.len(), "已加载工具池");
        Ok(Self::new(tools))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 各定义被抽中的累计次数
    pub fn usage_counts(&self) -> HashMap<String, u64> {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl ToolSource for StaticToolPool {
    fn sample(&self, count: usize, rng: &mut StdRng) -> Vec<ToolDefinition> {
        let count = count.min(self.tools.len());
        let sampled: Vec<ToolDefinition> = self
            .tools
            .choose_multiple(rng, count)
            .cloned()
            .collect();

        if let Ok(mut usage) = self.usage.lock() {
            for tool in &sampled {
                *usage.entry(tool.name.clone()).or_insert(0) += 1;
            }
        }
        sampled
    }
}

/// 内置演示池
///
/// 覆盖必填/可选参数、嵌套 returns 与原始类型名（int/dict/list），
/// 配合 Mock 后端可离线产出完整语料。
pub fn demo_pool() -> StaticToolPool {
    let tools = vec![
        ToolDefinition::new("get_weather", "获取指定城市的天气信息")
            .with_parameters(json!({
                "type": "dict",
                "properties": {
                    "city": {"type": "string", "description": "城市名称"},
                    "days": {"type": "int", "description": "预报天数", "default": 1}
                },
                "required": ["city"]
            }))
            .with_returns(json!({
                "type": "dict",
                "properties": {
                    "temperature": {"type": "float"},
                    "condition": {"type": "string"},
                    "forecast": {"type": "list"}
                }
            })),
        ToolDefinition::new("search_music", "搜索音乐")
            .with_parameters(json!({
                "type": "dict",
                "properties": {
                    "query": {"type": "string", "description": "搜索关键词"},
                    "limit": {"type": "int", "description": "返回数量", "default": 10}
                },
                "required": ["query"]
            }))
            .with_returns(json!({
                "type": "list",
                "items": {
                    "type": "dict",
                    "properties": {
                        "title": {"type": "string"},
                        "artist": {"type": "string"}
                    }
                }
            })),
        ToolDefinition::new("search_restaurants", "按城市和菜系搜索餐厅")
            .with_parameters(json!({
                "type": "dict",
                "properties": {
                    "city": {"type": "string", "description": "城市名称"},
                    "cuisine": {"type": "string", "description": "菜系", "enum": ["川菜", "粤菜", "日料", "西餐"]},
                    "max_results": {"type": "int", "default": 5}
                },
                "required": ["city"]
            }))
            .with_returns(json!({
                "type": "list",
                "items": {
                    "type": "dict",
                    "properties": {
                        "name": {"type": "string"},
                        "rating": {"type": "float"},
                        "address": {"type": "string"}
                    }
                }
            })),
        ToolDefinition::new("create_calendar_event", "创建日程事件")
            .with_parameters(json!({
                "type": "dict",
                "properties": {
                    "title": {"type": "string", "description": "事件标题"},
                    "start_time": {"type": "string", "description": "开始时间", "format": "date-time"},
                    "duration_minutes": {"type": "int", "default": 60},
                    "attendees": {"type": "list", "description": "参会人邮箱列表"}
                },
                "required": ["title", "start_time"]
            }))
            .with_returns(json!({
                "type": "dict",
                "properties": {
                    "event_id": {"type": "string"},
                    "status": {"type": "string"}
                }
            })),
        ToolDefinition::new("translate_text", "文本翻译")
            .with_parameters(json!({
                "type": "dict",
                "properties": {
                    "text": {"type": "string", "description": "待翻译文本"},
                    "target_language": {"type": "string", "description": "目标语言代码"},
                    "formal": {"type": "boolean", "default": false}
                },
                "required": ["text", "target_language"]
            }))
            .with_returns(json!({
                "type": "dict",
                "properties": {
                    "translated": {"type": "string"},
                    "detected_language": {"type": "string"}
                }
            })),
    ];
    StaticToolPool::new(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_sample_is_reproducible_with_same_seed() {
        let pool = demo_pool();
        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);

        let a: Vec<String> = pool.sample(3, &mut rng_a).into_iter().map(|t| t.name).collect();
        let b: Vec<String> = pool.sample(3, &mut rng_b).into_iter().map(|t| t.name).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_caps_at_pool_size() {
        let pool = StaticToolPool::new(vec![ToolDefinition::new("only_one", "唯一")]);
        let mut rng = StdRng::seed_from_u64(1);

        let sampled = pool.sample(10, &mut rng);
        assert_eq!(sampled.len(), 1);
    }

    #[test]
    fn test_sample_updates_usage_counts() {
        let pool = demo_pool();
        let mut rng = StdRng::seed_from_u64(42);

        pool.sample(pool.len(), &mut rng);
        pool.sample(pool.len(), &mut rng);

        let usage = pool.usage_counts();
        assert_eq!(usage.len(), pool.len());
        assert!(usage.values().all(|&n| n == 2));
    }

    #[test]
    fn test_from_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        let defs = vec![
            ToolDefinition::new("get_stock_price", "查询股价"),
            ToolDefinition::new("send_email", "发送邮件"),
        ];
        std::fs::write(&path, serde_json::to_string(&defs).unwrap()).unwrap();

        let pool = StaticToolPool::from_json_file(&path).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_from_json_file_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            StaticToolPool::from_json_file(&path),
            Err(EngineError::JsonParse(_))
        ));
    }
}
