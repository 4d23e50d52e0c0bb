//! One-shot queries
//!
//! [`query`] passes a single prompt on the command line and needs no
//! handshake. [`query_stream`] feeds a stream of user messages over stdin and
//! supports hooks, permission callbacks, and embedded MCP servers.

use futures::Stream;

use crate::control::ControlEngine;
use crate::error::{ClaudeError, Result};
use crate::transport::{PromptInput, SubprocessTransport, Transport};
use crate::types::{ClaudeAgentOptions, Message};

/// One-shot query function for simple interactions with Claude Code
///
/// The returned stream ends when the CLI exits; the process is cleaned up
/// when the stream finishes.
///
/// # Errors
/// `InvalidConfig` when a permission callback is configured (it needs
/// streaming mode), `CliNotFound` / `Connection` when the CLI cannot start.
///
/// # Example
///
/// ```no_run
/// use claude_agent_control::query;
/// use futures::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let stream = query("What is the capital of France?", None).await?;
///     let mut stream = Box::pin(stream);
///
///     while let Some(message) = stream.next().await {
///         println!("{:?}", message?);
///     }
///     Ok(())
/// }
/// ```
pub async fn query(
    prompt: impl Into<String>,
    options: Option<ClaudeAgentOptions>,
) -> Result<impl Stream<Item = Result<Message>>> {
    let options = options.unwrap_or_default();
    options.validate()?;
    if options.can_use_tool.is_some() {
        return Err(ClaudeError::invalid_config(
            "can_use_tool callback requires streaming mode; use query_stream or ClaudeSDKClient",
        ));
    }

    let prompt: String = prompt.into();
    let mut transport = SubprocessTransport::new(PromptInput::from(prompt), options.clone(), None)?;
    transport.connect().await?;

    let engine = ControlEngine::new(Box::new(transport), &options);
    engine.start().await?;
    Ok(drain(engine))
}

/// Query with a stream of user messages
///
/// Each item is written as one line, e.g.
/// `{"type":"user","message":{"role":"user","content":"..."}}`.
pub async fn query_stream<S>(
    messages: S,
    options: Option<ClaudeAgentOptions>,
) -> Result<impl Stream<Item = Result<Message>>>
where
    S: Stream<Item = serde_json::Value> + Send + 'static,
{
    let options = options.unwrap_or_default();
    options.validate()?;
    let transport = SubprocessTransport::new(PromptInput::Stream, options.clone(), None)?;
    query_stream_with_transport(messages, options, Box::new(transport)).await
}

/// [`query_stream`] over a caller-supplied transport
pub async fn query_stream_with_transport<S>(
    messages: S,
    options: ClaudeAgentOptions,
    mut transport: Box<dyn Transport>,
) -> Result<impl Stream<Item = Result<Message>>>
where
    S: Stream<Item = serde_json::Value> + Send + 'static,
{
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
        let _ = engine.close().await;
        return Err(e);
    }

    engine.stream_input(messages);
    Ok(drain(engine))
}

fn drain(engine: ControlEngine) -> impl Stream<Item = Result<Message>> {
    async_stream::stream! {
        while let Some(item) = engine.next_message().await {
            yield item;
        }
        if let Err(e) = engine.close().await {
            tracing::debug!(error = %e, "Failed to close query session");
        }
    }
}
