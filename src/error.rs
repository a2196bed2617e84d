//! 错误类型定义
//!
//! 两层错误模型：LlmError 属于后端层（见 llm::traits），这里的 EngineError
//! 是编排层的致命错误。可恢复的工具执行失败不在此列，它们以结构化数据
//! 写进对话本身，批量层只会在这里列出的错误上把单条任务记为失败。

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("LLM 后端错误: {0}")]
    Llm(#[from] LlmError),

    #[error("用户请求生成失败: {0}")]
    QueryGeneration(String),

    #[error("ReAct 推理步失败: {0}")]
    ReactStep(String),

    #[error("工具模拟失败: {0}")]
    ToolSimulation(String),

    #[error("任务状态判定结果非法: {0}")]
    MalformedVerdict(String),

    #[error("不支持的模型方言: {0}")]
    UnsupportedDialect(String),

    #[error("JSON 解析失败: {0}")]
    JsonParse(String),

    #[error("对话生成超时（{0} 秒）")]
    JobTimeout(u64),

    #[error("结果落盘失败: {0}")]
    SinkWrite(String),

    #[error("配置错误: {0}")]
    Config(String),
}
