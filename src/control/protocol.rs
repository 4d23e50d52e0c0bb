//! Control protocol wire types and request correlation
//!
//! Control frames share stdout/stdin with conversation messages and are told
//! apart by their `type`:
//!
//! ```text
//! {"type":"control_request","request_id":"req_1_ab12cd34","request":{"subtype":"interrupt"}}
//! {"type":"control_response","response":{"subtype":"success","request_id":"req_1_ab12cd34","response":{}}}
//! ```
//!
//! [`ProtocolHandler`] owns the table of outbound requests still waiting for a
//! response. Each entry is resolved exactly once: by a response, by the
//! caller giving up (timeout), or by shutdown.
//!
//! # Example
//!
//! ```rust
//! use claude_agent_control::control::{ControlRequest, ProtocolHandler};
//!
//! let handler = ProtocolHandler::new();
//! let id = handler.next_request_id();
//! let frame = ProtocolHandler::request_frame(id, ControlRequest::Interrupt);
//! let line = handler.serialize_message(&frame).unwrap();
//! assert!(line.ends_with('\n'));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};

use crate::error::{ClaudeError, Result};
use crate::types::{PermissionMode, RequestId, ToolName};

/// Envelope of every control frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// A request in either direction
    ControlRequest {
        /// Correlation id; absent ids are answered with `null`
        #[serde(default)]
        request_id: Option<RequestId>,
        /// Request payload
        request: ControlRequest,
    },
    /// The answer to a request
    ControlResponse {
        /// Response payload
        response: ControlResponse,
    },
    /// The CLI withdrew a request it sent; recognised and ignored
    ControlCancelRequest {
        /// Id of the withdrawn request
        #[serde(default)]
        request_id: Option<RequestId>,
    },
}

/// Control request payloads, keyed by `subtype`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Stop the current turn
    Interrupt,
    /// Ask whether a tool may run (CLI → SDK)
    CanUseTool {
        /// Tool the agent wants to run
        tool_name: ToolName,
        /// Tool input
        #[serde(default)]
        input: serde_json::Value,
        /// Raw permission update suggestions
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission_suggestions: Option<Vec<serde_json::Value>>,
        /// Path outside the allowed directories, if that is the reason
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blocked_path: Option<String>,
    },
    /// Handshake carrying hook registrations (SDK → CLI)
    Initialize {
        /// `{"Event":[{"matcher","hookCallbackIds","timeout"}]}`
        #[serde(default)]
        hooks: Option<serde_json::Value>,
    },
    /// Change the permission mode
    SetPermissionMode {
        /// New mode
        mode: PermissionMode,
    },
    /// Change the model; `None` restores the default
    SetModel {
        /// Model identifier
        #[serde(default)]
        model: Option<String>,
    },
    /// Run a registered hook callback (CLI → SDK)
    HookCallback {
        /// Id assigned at registration
        callback_id: String,
        /// Hook input
        #[serde(default)]
        input: serde_json::Value,
        /// Tool use the hook fires for
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    /// JSON-RPC message for an embedded tool server (CLI → SDK)
    McpMessage {
        /// Target server
        server_name: String,
        /// JSON-RPC request
        message: serde_json::Value,
    },
    /// Ask for MCP server connection status
    McpStatus,
    /// Restore files to their state at a user message
    RewindFiles {
        /// UUID of the user message to rewind to
        user_message_id: String,
    },
}

impl ControlRequest {
    /// Wire subtype
    pub fn subtype(&self) -> &'static str {
        match self {
            ControlRequest::Interrupt => "interrupt",
            ControlRequest::CanUseTool { .. } => "can_use_tool",
            ControlRequest::Initialize { .. } => "initialize",
            ControlRequest::SetPermissionMode { .. } => "set_permission_mode",
            ControlRequest::SetModel { .. } => "set_model",
            ControlRequest::HookCallback { .. } => "hook_callback",
            ControlRequest::McpMessage { .. } => "mcp_message",
            ControlRequest::McpStatus => "mcp_status",
            ControlRequest::RewindFiles { .. } => "rewind_files",
        }
    }
}

/// Control response payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponse {
    /// Request handled
    Success {
        /// Id of the request this answers
        #[serde(default)]
        request_id: Option<RequestId>,
        /// Result payload
        #[serde(default)]
        response: Option<serde_json::Value>,
    },
    /// Request failed
    Error {
        /// Id of the request this answers
        #[serde(default)]
        request_id: Option<RequestId>,
        /// Failure description
        error: String,
    },
}

impl ControlResponse {
    /// Id of the request this answers
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            ControlResponse::Success { request_id, .. } | ControlResponse::Error { request_id, .. } => {
                request_id.as_ref()
            }
        }
    }
}

/// Routing decision for one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Answer to one of our requests
    Response(ControlResponse),
    /// A `control_response` whose payload did not decode
    MalformedResponse {
        /// Id, when it could be recovered
        request_id: Option<RequestId>,
        /// Decode failure
        reason: String,
    },
    /// A request from the CLI
    Request {
        /// Id to answer with
        request_id: Option<RequestId>,
        /// Payload
        request: ControlRequest,
    },
    /// A `control_request` whose payload did not decode; answered with an error
    MalformedRequest {
        /// Id, when it could be recovered
        request_id: Option<RequestId>,
        /// Decode failure
        reason: String,
    },
    /// Withdrawn request
    Cancel(Option<RequestId>),
    /// Anything else goes to the message decoder
    Conversation(serde_json::Value),
}

impl InboundFrame {
    /// Sort a raw frame into control traffic or conversation
    pub fn classify(value: serde_json::Value) -> Self {
        let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or_default();
        match kind {
            "control_request" | "control_response" | "control_cancel_request" => {}
            _ => return InboundFrame::Conversation(value),
        }

        let recovered_id = |v: &serde_json::Value| {
            v.get("request_id")
                .or_else(|| v.get("response").and_then(|r| r.get("request_id")))
                .and_then(|id| id.as_str())
                .map(RequestId::from)
        };

        match serde_json::from_value::<ControlMessage>(value.clone()) {
            Ok(ControlMessage::ControlRequest {
                request_id,
                request,
            }) => InboundFrame::Request {
                request_id,
                request,
            },
            Ok(ControlMessage::ControlResponse { response }) => InboundFrame::Response(response),
            Ok(ControlMessage::ControlCancelRequest { request_id }) => {
                InboundFrame::Cancel(request_id)
            }
            Err(e) if kind == "control_request" => InboundFrame::MalformedRequest {
                request_id: recovered_id(&value),
                reason: e.to_string(),
            },
            Err(e) if kind == "control_response" => InboundFrame::MalformedResponse {
                request_id: recovered_id(&value),
                reason: e.to_string(),
            },
            Err(_) => InboundFrame::Cancel(recovered_id(&value)),
        }
    }
}

/// Why the handler stopped accepting requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The engine was closed by its owner
    Closed,
    /// The inbound stream ended or failed
    StreamEnded(String),
}

impl ShutdownReason {
    fn to_error(&self) -> ClaudeError {
        match self {
            ShutdownReason::Closed => ClaudeError::closed("engine closed"),
            ShutdownReason::StreamEnded(reason) => ClaudeError::connection(format!(
                "Control stream ended before a response arrived: {reason}"
            )),
        }
    }
}

/// Pending request awaiting response
struct PendingRequest {
    response_tx: oneshot::Sender<Result<serde_json::Value>>,
    subtype: &'static str,
    created_at: Instant,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
    shutdown: Option<ShutdownReason>,
}

/// Request id allocation and the pending-request table
pub struct ProtocolHandler {
    next_request_id: AtomicU64,
    pending: Mutex<PendingTable>,
}

impl ProtocolHandler {
    /// Create a new protocol handler
    pub fn new() -> Self {
        Self {
            next_request_id: AtomicU64::new(1),
            pending: Mutex::new(PendingTable::default()),
        }
    }

    /// Allocate `req_{counter}_{8 random hex digits}`
    pub fn next_request_id(&self) -> RequestId {
        let n = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        RequestId::new(format!("req_{n}_{}", &suffix[..8]))
    }

    /// Register a pending entry before its frame is written
    ///
    /// # Errors
    /// Fails with the shutdown error once [`shutdown`](Self::shutdown) ran.
    pub async fn register(
        &self,
        id: RequestId,
        subtype: &'static str,
    ) -> Result<oneshot::Receiver<Result<serde_json::Value>>> {
        let mut table = self.pending.lock().await;
        if let Some(reason) = &table.shutdown {
            return Err(reason.to_error());
        }
        let (response_tx, response_rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                response_tx,
                subtype,
                created_at: Instant::now(),
            },
        );
        Ok(response_rx)
    }

    /// Complete the entry a response answers
    ///
    /// Returns false when no entry matches (late, duplicate, or unknown id).
    pub async fn resolve(&self, response: ControlResponse) -> bool {
        let Some(id) = response.request_id().cloned() else {
            tracing::debug!("Discarding control response without request_id");
            return false;
        };
        let outcome = match response {
            ControlResponse::Success { response, .. } => {
                Ok(response.unwrap_or(serde_json::Value::Null))
            }
            ControlResponse::Error { error, .. } => Err(ClaudeError::control_protocol(error)),
        };
        self.complete(&id, outcome).await
    }

    /// Complete an entry with an explicit outcome
    pub async fn complete(&self, id: &RequestId, outcome: Result<serde_json::Value>) -> bool {
        let entry = self.pending.lock().await.entries.remove(id);
        match entry {
            Some(pending) => {
                tracing::trace!(
                    request_id = %id,
                    subtype = pending.subtype,
                    elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                    "Control request resolved"
                );
                // The waiter may already have given up
                let _ = pending.response_tx.send(outcome);
                true
            }
            None => {
                tracing::debug!(request_id = %id, "Discarding unmatched control response");
                false
            }
        }
    }

    /// Drop an entry whose caller stopped waiting
    pub async fn forget(&self, id: &RequestId) -> bool {
        self.pending.lock().await.entries.remove(id).is_some()
    }

    /// Fail every pending entry and refuse new ones; returns how many failed
    ///
    /// Only the first call has an effect.
    pub async fn shutdown(&self, reason: ShutdownReason) -> usize {
        let mut table = self.pending.lock().await;
        if table.shutdown.is_some() {
            return 0;
        }
        let drained: Vec<_> = table.entries.drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            tracing::debug!(request_id = %id, subtype = pending.subtype, "Failing pending control request");
            let _ = pending.response_tx.send(Err(reason.to_error()));
        }
        table.shutdown = Some(reason);
        count
    }

    /// Number of requests still waiting for a response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.entries.len()
    }

    /// Wrap a request in its envelope
    pub fn request_frame(id: RequestId, request: ControlRequest) -> ControlMessage {
        ControlMessage::ControlRequest {
            request_id: Some(id),
            request,
        }
    }

    /// Success reply to an inbound request
    pub fn success_frame(id: Option<RequestId>, response: serde_json::Value) -> ControlMessage {
        ControlMessage::ControlResponse {
            response: ControlResponse::Success {
                request_id: id,
                response: Some(response),
            },
        }
    }

    /// Error reply to an inbound request
    pub fn error_frame(id: Option<RequestId>, error: impl Into<String>) -> ControlMessage {
        ControlMessage::ControlResponse {
            response: ControlResponse::Error {
                request_id: id,
                error: error.into(),
            },
        }
    }

    /// Serialize control message to one newline-terminated line
    pub fn serialize_message(&self, message: &ControlMessage) -> Result<String> {
        serde_json::to_string(message)
            .map(|s| format!("{s}\n"))
            .map_err(ClaudeError::JsonDecode)
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}
