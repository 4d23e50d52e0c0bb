//! Transport layer for communicating with the Claude Code CLI
//!
//! A transport moves newline-delimited JSON frames to and from the CLI
//! process. The engine only ever sees the [`Transport`] trait, so tests can
//! substitute an in-memory implementation.

pub mod codec;
pub mod subprocess;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Transport trait for communicating with Claude Code
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the underlying process or connection
    ///
    /// # Errors
    /// `CliNotFound` when the executable does not exist, `Connection` for
    /// any other start-up failure
    async fn connect(&mut self) -> Result<()>;

    /// Write one already-framed line (must end with `\n`)
    ///
    /// # Errors
    /// `Connection` when the transport is not ready or the pipe is broken
    async fn write(&mut self, data: &str) -> Result<()>;

    /// Close the input direction only; reading continues
    async fn end_input(&mut self) -> Result<()>;

    /// Start reading frames in the background
    ///
    /// The receiver is bounded, yields frames in the order they were read,
    /// and closes at end of stream. Per-frame failures (`BufferOverflow`,
    /// `JsonDecode`) are delivered as `Err` items and reading continues;
    /// a terminal error such as `Process` is the last item before close.
    fn read_messages(&mut self) -> mpsc::Receiver<Result<serde_json::Value>>;

    /// Check if transport is ready for communication
    fn is_ready(&self) -> bool;

    /// Terminate the process and release resources. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

pub use subprocess::{PromptInput, SubprocessTransport, DEFAULT_MAX_BUFFER_SIZE};
