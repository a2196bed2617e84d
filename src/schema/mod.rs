pub mod normalize;

pub use normalize::{normalize, remap_schema, sanitize_tool_name, Dialect, NormalizedTool};
