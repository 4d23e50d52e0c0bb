//! ClaudeSDKClient for interactive sessions
//!
//! The client is a thin facade over [`ControlEngine`]: it starts the CLI in
//! streaming mode, performs the `initialize` handshake, and then lets the
//! caller send messages, read the conversation, and issue control commands.
//!
//! ```text
//!  caller ──send_message──▶ transport (locked per write) ──▶ CLI
//!  caller ◀─next_message─── consumer queue ◀── reader task ◀── CLI
//!                                   └──▶ hook / permission / MCP tasks ──▶ CLI
//! ```
//!
//! # Example
//!
//! ```no_run
//! use claude_agent_control::{ClaudeSDKClient, ClaudeAgentOptions, Message};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClaudeSDKClient::new(ClaudeAgentOptions::default(), None).await?;
//! client.send_message("Hello, Claude!").await?;
//!
//! let mut turn = Box::pin(client.receive_response());
//! while let Some(message) = turn.next().await {
//!     if let Message::Assistant { message, .. } = message? {
//!         println!("Response: {:?}", message.content);
//!     }
//! }
//! drop(turn);
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use futures::{Stream, StreamExt};
use std::path::PathBuf;

use crate::control::ControlEngine;
use crate::error::Result;
use crate::transport::{PromptInput, SubprocessTransport, Transport};
use crate::types::{ClaudeAgentOptions, Message, PermissionMode, SessionId};

/// Client for bidirectional communication with Claude Code
pub struct ClaudeSDKClient {
    engine: ControlEngine,
}

impl ClaudeSDKClient {
    /// Start the CLI in streaming mode and complete the handshake
    ///
    /// # Errors
    /// `InvalidConfig` for rejected options, `CliNotFound` / `Connection`
    /// when the CLI cannot be started or does not answer `initialize`.
    pub async fn new(options: ClaudeAgentOptions, cli_path: Option<PathBuf>) -> Result<Self> {
        options.validate()?;
        let transport = SubprocessTransport::new(PromptInput::Stream, options.clone(), cli_path)?;
        Self::with_transport(options, Box::new(transport)).await
    }

    /// Run a session over a caller-supplied transport
    pub async fn with_transport(
        options: ClaudeAgentOptions,
        mut transport: Box<dyn Transport>,
    ) -> Result<Self> {
        options.validate()?;
        if !transport.is_ready() {
            transport.connect().await?;
        }

        let engine = ControlEngine::new(transport, &options);
        let started = async {
            engine.start().await?;
            engine.initialize().await
        }
        .await;

        if let Err(e) = started {
            tracing::debug!(error = %e, "Session start failed, closing");
            let _ = engine.close().await;
            return Err(e);
        }

        Ok(Self { engine })
    }

    /// Send a user message in the default session
    pub async fn send_message(&self, prompt: impl Into<String>) -> Result<()> {
        self.send_message_to(prompt, SessionId::default()).await
    }

    /// Send a user message in a specific session
    pub async fn send_message_to(
        &self,
        prompt: impl Into<String>,
        session_id: impl Into<SessionId>,
    ) -> Result<()> {
        let prompt: String = prompt.into();
        let session_id: SessionId = session_id.into();
        let message = serde_json::json!({
            "type": "user",
            "message": {"role": "user", "content": prompt},
            "parent_tool_use_id": null,
            "session_id": session_id,
        });
        self.engine.write_message(&message).await
    }

    /// Write every message of a stream; input stays open afterwards
    pub async fn send_stream<S>(&self, stream: S) -> Result<()>
    where
        S: Stream<Item = serde_json::Value> + Send,
    {
        futures::pin_mut!(stream);
        while let Some(message) = stream.next().await {
            self.engine.write_message(&message).await?;
        }
        Ok(())
    }

    /// Next conversation message; `None` once the session ended
    pub async fn next_message(&self) -> Option<Result<Message>> {
        self.engine.next_message().await
    }

    /// All remaining conversation messages
    pub fn receive_messages(&self) -> impl Stream<Item = Result<Message>> + '_ {
        self.engine.receive_messages()
    }

    /// Messages up to and including the next result message
    pub fn receive_response(&self) -> impl Stream<Item = Result<Message>> + '_ {
        self.engine.receive_response()
    }

    /// Interrupt the current turn
    pub async fn interrupt(&self) -> Result<()> {
        self.engine.interrupt().await
    }

    /// Switch model; `None` restores the default
    pub async fn set_model(&self, model: Option<&str>) -> Result<()> {
        self.engine.set_model(model.map(str::to_string)).await
    }

    /// Change the permission mode
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.engine.set_permission_mode(mode).await
    }

    /// Restore files to their state at a user message
    ///
    /// Requires `enable_file_checkpointing`.
    pub async fn rewind_files(&self, user_message_id: &str) -> Result<()> {
        self.engine.rewind_files(user_message_id).await
    }

    /// Connection status of the configured MCP servers
    pub async fn get_mcp_status(&self) -> Result<serde_json::Value> {
        self.engine.mcp_status().await
    }

    /// The CLI's reply to `initialize`
    pub fn get_server_info(&self) -> Option<serde_json::Value> {
        self.engine.server_info()
    }

    /// End the session and stop the CLI
    pub async fn close(&self) -> Result<()> {
        self.engine.close().await
    }
}
