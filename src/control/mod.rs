//! Control protocol for bidirectional communication with Claude Code
//!
//! The control protocol runs over the same transport as conversation
//! messages. The SDK sends commands (`initialize`, `interrupt`, `set_model`,
//! ...) and the CLI calls back for hooks, permission checks, and embedded MCP
//! servers.
//!
//! ## Message Flow
//!
//! ```text
//! SDK                                CLI
//!  |--- control_request initialize --->|
//!  |<-- control_response success ------|
//!  |--- user message ----------------->|
//!  |<-- assistant message -------------|
//!  |<-- control_request hook_callback -|
//!  |--- control_response success ----->|
//!  |<-- control_request can_use_tool --|
//!  |--- control_response success ----->|
//!  |<-- result message ----------------|
//! ```

pub mod engine;
pub mod protocol;

pub use engine::{ControlEngine, EngineState};
pub use protocol::{
    ControlMessage, ControlRequest, ControlResponse, InboundFrame, ProtocolHandler, ShutdownReason,
};
