//! Silkworm - 多智能体函数调用语料合成引擎
//!
//! 三个提示词驱动的智能体（用户 / 助手 / 工具）围绕采样出的候选 API
//! 协作，按 ReAct 循环合成多子任务对话，产出 JSONL 训练语料。
//!
//! 模块划分：
//! - **agents**: 用户 / 助手 / 工具三个角色智能体
//! - **batch**: 批量生成（串行 / 派生任务 / 流式缓冲三种策略）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **dialog**: 对话数据结构、子任务 ReAct 循环与编排引擎
//! - **llm**: LLM 客户端抽象与实现（Claude / OpenAI 兼容 / Mock）
//! - **schema**: 工具名清洗、类型规整与方言转换
//! - **scoring**: 成品对话的复杂度评分
//! - **sink**: JSONL 落盘
//! - **tools**: 工具定义与候选 API 池

pub mod agents;
pub mod batch;
pub mod config;
pub mod dialog;
pub mod error;
pub mod llm;
pub mod observability;
pub mod schema;
pub mod scoring;
pub mod sink;
pub mod tools;

pub use error::EngineError;
