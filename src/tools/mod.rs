//! Tool system for function calling.

pub mod arguments;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use registry::{ToolEntry, ToolRegistry};
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::{ExecutionMode, ParameterBuilder, ToolClass, ToolDefinition, ToolParameters};
