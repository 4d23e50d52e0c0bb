//! Embedded MCP tool server
//!
//! Tools registered here run inside this process. The CLI learns about the
//! server through `--mcp-config` (`{"type":"sdk","name":..}`) and forwards
//! JSON-RPC traffic for it as `mcp_message` control requests, which the
//! engine hands to [`SdkMcpServer::handle_message`].
//!
//! # Quick Start
//!
//! ```rust
//! use claude_agent_control::mcp::{ParamKind, SdkMcpServer, SdkMcpTool, ToolParam, ToolResult};
//! use claude_agent_control::ClaudeAgentOptions;
//!
//! let server = SdkMcpServer::new("my-tools").version("1.0.0").tool(SdkMcpTool::with_params(
//!     "greet",
//!     "Greet a user by name",
//!     vec![ToolParam::required("name", ParamKind::String)],
//!     |args| async move {
//!         let name = args[0].as_str().unwrap_or("stranger").to_string();
//!         Ok(ToolResult::text(format!("Hello, {name}!")))
//!     },
//! ));
//!
//! let options = ClaudeAgentOptions::builder()
//!     .sdk_mcp_server(server)
//!     .add_allowed_tool("mcp__my-tools__greet")
//!     .build();
//! # let _ = options;
//! ```

pub mod protocol;
mod server;
mod tool;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpError};
pub use server::{SdkMcpServer, MCP_PROTOCOL_VERSION};
pub use tool::{ParamKind, SdkMcpTool, ToolContent, ToolParam, ToolResult};

/// Handler receiving the raw `arguments` object
pub type ToolHandler = Arc<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = crate::error::Result<ToolResult>> + Send>>
        + Send
        + Sync,
>;

/// Handler receiving arguments positionally, in parameter declaration order
pub type PositionalHandler = Arc<
    dyn Fn(Vec<serde_json::Value>) -> Pin<Box<dyn Future<Output = crate::error::Result<ToolResult>> + Send>>
        + Send
        + Sync,
>;
