//! 三个角色代理：用户提请求、助手做推理、工具造结果

pub mod assistant;
pub mod tool;
pub mod user;

pub use assistant::{AssistantAgent, AssistantStep};
pub use tool::{TaskStatus, TaskVerdict, ToolAgent};
pub use user::UserAgent;
