//! MCP server protocol: JSON-RPC wire types and the single-tool handler.

pub mod handler;
pub mod types;

pub use handler::{CallerContext, McpHandler, TOOL_NAME, ToolCallHandler, ToolCallRequest};
