//! MCP gateway: token gate, session registry, and the SSE and stdio transports.

pub mod auth;
pub mod registry;
pub mod server;
pub mod session;
pub mod stdio;

pub use registry::{CloseGuard, SessionRegistry};
pub use server::{GatewayState, start_server};
pub use session::{SessionContext, SessionHandler, SessionId};
