//! 对话数据模型、子任务循环与编排引擎

pub mod engine;
pub mod subtask;
pub mod types;

pub use engine::DialogEngine;
pub use subtask::SubtaskRunner;
pub use types::{
    content_hash_id, count_react_steps, count_tool_calls, Dialog, DialogMetadata, FunctionCall,
    SubtaskRecord, ToolResponse, Turn,
};
