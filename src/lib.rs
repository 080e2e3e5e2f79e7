//! hedera-mcp: an MCP server exposing a stateful Hedera agent tool.
//!
//! The gateway accepts MCP clients over SSE (or stdio), routes each session's
//! JSON-RPC traffic to its own worker, and relays `interact-with-hedera`
//! calls to the agent backend. The agent backend runs one LLM turn per call
//! on a thread owned by the calling session.

pub mod agent;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod mcp;
pub mod relay;
pub mod tools;

pub use config::Config;
