pub mod definition;
pub mod source;

pub use definition::ToolDefinition;
pub use source::{demo_pool, StaticToolPool, ToolSource};
