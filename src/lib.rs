//! # Claude Agent Control
//!
//! Drives the Claude Code CLI over its stdio control protocol: a line-framed
//! JSON transport, a message decoder, a control engine that correlates
//! requests with responses and answers the CLI's own requests (hooks,
//! permission checks, embedded MCP servers), and an in-process MCP tool
//! server.
//!
//! ## Quick Start
//!
//! ```no_run
//! use claude_agent_control::{query, Message};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = query("What is 2 + 2?", None).await?;
//!     let mut stream = Box::pin(stream);
//!
//!     while let Some(message) = stream.next().await {
//!         if let Message::Assistant { message, .. } = message? {
//!             println!("Claude: {:?}", message.content);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Interactive sessions
//!
//! ```no_run
//! # use claude_agent_control::{ClaudeSDKClient, ClaudeAgentOptions, PermissionMode};
//! # use futures::StreamExt;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClaudeSDKClient::new(ClaudeAgentOptions::default(), None).await?;
//! client.send_message("Refactor src/lib.rs").await?;
//! client.set_permission_mode(PermissionMode::AcceptEdits).await?;
//!
//! let mut turn = Box::pin(client.receive_response());
//! while let Some(message) = turn.next().await {
//!     println!("{:?}", message?);
//! }
//! drop(turn);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Hooks and permissions
//!
//! ```no_run
//! # use claude_agent_control::{ClaudeAgentOptions, HookEvent, HookManager, HookMatcherBuilder, HookOutput, PermissionManager};
//! # use claude_agent_control::types::{PermissionResult, PermissionResultAllow, PermissionResultDeny};
//! # use std::collections::HashMap;
//! let audit = HookManager::callback(|input, tool_use_id, _ctx| async move {
//!     println!("{:?} requested {}", tool_use_id, input["tool_name"]);
//!     Ok(HookOutput::default())
//! });
//!
//! let mut hooks = HashMap::new();
//! hooks.insert(
//!     HookEvent::PreToolUse,
//!     vec![HookMatcherBuilder::new(Some("Bash")).add_hook(audit).build()],
//! );
//!
//! let gate = PermissionManager::callback(|tool, _input, _ctx| async move {
//!     Ok(match tool.as_str() {
//!         "Read" | "Glob" => PermissionResult::Allow(PermissionResultAllow::default()),
//!         _ => PermissionResult::Deny(PermissionResultDeny {
//!             message: "read-only session".to_string(),
//!             interrupt: false,
//!         }),
//!     })
//! });
//!
//! let options = ClaudeAgentOptions::builder().hooks(hooks).can_use_tool(gate).build();
//! # let _ = options;
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: process spawning and line framing
//! - [`message`]: conversation message decoding
//! - [`control`]: request correlation and inbound dispatch
//! - [`mcp`]: embedded JSON-RPC tool server
//! - [`hooks`], [`permissions`]: callback registries used by the engine
//! - [`client`], [`query()`]: facades over the engine
//!
//! Logging goes through `tracing`; install any subscriber to see it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod control;
pub mod error;
pub mod hooks;
pub mod mcp;
pub mod message;
pub mod permissions;
pub mod query;
pub mod transport;
pub mod types;

pub use client::ClaudeSDKClient;
pub use control::{ControlEngine, EngineState};
pub use error::{ClaudeError, Result};
pub use hooks::{HookManager, HookMatcherBuilder};
pub use message::parse_message;
pub use permissions::{PermissionManager, PermissionManagerBuilder};
pub use query::{query, query_stream, query_stream_with_transport};
pub use transport::{PromptInput, SubprocessTransport, Transport};
pub use types::{
    AgentDefinition, CanUseToolCallback, ClaudeAgentOptions, ClaudeAgentOptionsBuilder,
    ContentBlock, ContentValue, HookCallback, HookContext, HookDecision, HookEvent, HookMatcher,
    HookOutput, McpHttpServerConfig, McpServerConfig, McpServers, McpSseServerConfig,
    McpStdioServerConfig, Message, PermissionBehavior, PermissionMode, PermissionResult,
    PermissionResultAllow, PermissionResultDeny, PermissionRuleValue, PermissionUpdate,
    PermissionUpdateDestination, RequestId, SessionId, SettingSource, StderrCallback,
    SystemPrompt, SystemPromptPreset, ToolName, ToolPermissionContext, UserContent,
};

/// Crate version, reported to the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
