//! The control engine: one reader, many waiters
//!
//! A single reader task drains the transport and routes every frame:
//! conversation messages go to a bounded consumer queue, control responses
//! complete pending requests, and control requests from the CLI are handled
//! in their own tasks so a slow hook or tool never holds up the stream.

use futures::{FutureExt, Stream, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{ControlMessage, ControlRequest, InboundFrame, ProtocolHandler, ShutdownReason};
use crate::error::{ClaudeError, Result};
use crate::hooks::HookManager;
use crate::mcp::{JsonRpcResponse, McpError, SdkMcpServer};
use crate::message::parse_message;
use crate::permissions::{decision_payload, permission_context, PermissionManager, PermissionManagerBuilder};
use crate::transport::Transport;
use crate::types::{ClaudeAgentOptions, HookContext, Message, PermissionMode, RequestId};

/// Lifecycle of a [`ControlEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Built, reader not started
    Created = 0,
    /// Reader running, no handshake yet
    Reading = 1,
    /// `initialize` in flight
    Initializing = 2,
    /// Handshake done; outbound commands allowed
    Ready = 3,
    /// `close` in progress
    Closing = 4,
    /// Terminal
    Closed = 5,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Created,
            1 => EngineState::Reading,
            2 => EngineState::Initializing,
            3 => EngineState::Ready,
            4 => EngineState::Closing,
            _ => EngineState::Closed,
        }
    }
}

type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

struct EngineInner {
    transport: SharedTransport,
    protocol: ProtocolHandler,
    hooks: HookManager,
    permissions: PermissionManager,
    sdk_servers: HashMap<String, Arc<SdkMcpServer>>,
    cancel: CancellationToken,
    state: AtomicU8,
    control_timeout: Duration,
    initialize_timeout: Duration,
    server_info: OnceLock<serde_json::Value>,
    init_lock: Mutex<()>,
    first_result: watch::Sender<bool>,
}

/// Drives the control protocol over a [`Transport`]
///
/// Every method takes `&self`; the engine can be shared behind an `Arc` so
/// one task consumes messages while another issues commands.
pub struct ControlEngine {
    inner: Arc<EngineInner>,
    message_rx: Mutex<mpsc::Receiver<Result<Message>>>,
    message_tx: std::sync::Mutex<Option<mpsc::Sender<Result<Message>>>>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    stream_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

fn take_slot<T>(slot: &std::sync::Mutex<Option<T>>) -> Option<T> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}

fn put_slot<T>(slot: &std::sync::Mutex<Option<T>>, value: T) {
    if let Ok(mut guard) = slot.lock() {
        *guard = Some(value);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl ControlEngine {
    /// Build an engine around a connected transport
    pub fn new(transport: Box<dyn Transport>, options: &ClaudeAgentOptions) -> Self {
        let hooks = options
            .hooks
            .as_ref()
            .map(HookManager::from_hooks)
            .unwrap_or_default();
        let permissions = PermissionManagerBuilder::new()
            .callback(options.can_use_tool.clone())
            .allowed_tools(options.allowed_tools.clone())
            .disallowed_tools(options.disallowed_tools.clone())
            .build();
        let (message_tx, message_rx) = mpsc::channel(options.effective_message_buffer_capacity());
        let (first_result, _) = watch::channel(false);

        let inner = EngineInner {
            transport: Arc::new(Mutex::new(transport)),
            protocol: ProtocolHandler::new(),
            hooks,
            permissions,
            sdk_servers: options.mcp_servers.sdk_servers(),
            cancel: CancellationToken::new(),
            state: AtomicU8::new(EngineState::Created as u8),
            control_timeout: options.effective_control_timeout(),
            initialize_timeout: options.effective_initialize_timeout(),
            server_info: OnceLock::new(),
            init_lock: Mutex::new(()),
            first_result,
        };

        Self {
            inner: Arc::new(inner),
            message_rx: Mutex::new(message_rx),
            message_tx: std::sync::Mutex::new(Some(message_tx)),
            reader_task: std::sync::Mutex::new(None),
            stream_task: std::sync::Mutex::new(None),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.inner.state()
    }

    /// Outbound requests still waiting for a response
    pub async fn pending_requests(&self) -> usize {
        self.inner.protocol.pending_count().await
    }

    /// Whether the CLI may call back into this process
    pub fn has_inbound_handlers(&self) -> bool {
        self.inner.has_inbound_handlers()
    }

    /// Start the reader task
    ///
    /// # Errors
    /// `ControlProtocol` when called twice, `Closed` after close.
    pub async fn start(&self) -> Result<()> {
        match self.inner.state.compare_exchange(
            EngineState::Created as u8,
            EngineState::Reading as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(current) if current >= EngineState::Closing as u8 => {
                return Err(ClaudeError::closed("engine closed before start"))
            }
            Err(_) => return Err(ClaudeError::control_protocol("engine already started")),
        }

        let message_tx = take_slot(&self.message_tx)
            .ok_or_else(|| ClaudeError::closed("consumer queue already released"))?;
        let frames = self.inner.transport.lock().await.read_messages();

        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.run_reader(frames, message_tx).await });
        put_slot(&self.reader_task, task);
        tracing::debug!("Control engine reader started");
        Ok(())
    }

    /// Perform the `initialize` handshake
    ///
    /// Returns the CLI's reply, which is also cached for
    /// [`server_info`](Self::server_info). Calling again returns the cached
    /// reply without another round trip.
    ///
    /// # Errors
    /// `Connection` when the CLI does not answer within the initialize timeout.
    pub async fn initialize(&self) -> Result<serde_json::Value> {
        let _guard = self.inner.init_lock.lock().await;
        if let Some(info) = self.inner.server_info.get() {
            return Ok(info.clone());
        }

        match self.state() {
            EngineState::Reading => {}
            EngineState::Created => {
                return Err(ClaudeError::control_protocol(
                    "engine must be started before initialize",
                ))
            }
            EngineState::Closing | EngineState::Closed => {
                return Err(ClaudeError::closed("engine closed"))
            }
            EngineState::Initializing | EngineState::Ready => {
                return Err(ClaudeError::control_protocol("initialize already in progress"))
            }
        }

        self.inner.set_state(EngineState::Initializing);
        let request = ControlRequest::Initialize {
            hooks: self.inner.hooks.initialize_config(),
        };
        let outcome = self
            .inner
            .send_control_request(request, self.inner.initialize_timeout)
            .await;

        match outcome {
            Ok(info) => {
                let _ = self.inner.server_info.set(info.clone());
                self.inner.transition(EngineState::Initializing, EngineState::Ready);
                tracing::debug!("Control protocol initialized");
                Ok(info)
            }
            Err(e) => {
                self.inner.transition(EngineState::Initializing, EngineState::Reading);
                Err(match e {
                    ClaudeError::Timeout(_) => ClaudeError::connection(format!(
                        "CLI did not answer initialize within {:?}",
                        self.inner.initialize_timeout
                    )),
                    other => other,
                })
            }
        }
    }

    /// Reply to `initialize`, if the handshake happened
    pub fn server_info(&self) -> Option<serde_json::Value> {
        self.inner.server_info.get().cloned()
    }

    /// Interrupt the current turn
    pub async fn interrupt(&self) -> Result<()> {
        self.command(ControlRequest::Interrupt).await.map(|_| ())
    }

    /// Change the permission mode for the rest of the session
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.command(ControlRequest::SetPermissionMode { mode })
            .await
            .map(|_| ())
    }

    /// Switch model; `None` restores the default
    pub async fn set_model(&self, model: Option<String>) -> Result<()> {
        self.command(ControlRequest::SetModel { model }).await.map(|_| ())
    }

    /// Restore tracked files to their state at a user message
    pub async fn rewind_files(&self, user_message_id: impl Into<String>) -> Result<()> {
        self.command(ControlRequest::RewindFiles {
            user_message_id: user_message_id.into(),
        })
        .await
        .map(|_| ())
    }

    /// Connection status of the configured MCP servers
    pub async fn mcp_status(&self) -> Result<serde_json::Value> {
        self.command(ControlRequest::McpStatus).await
    }

    async fn command(&self, request: ControlRequest) -> Result<serde_json::Value> {
        match self.state() {
            EngineState::Ready => {}
            EngineState::Closing | EngineState::Closed => {
                return Err(ClaudeError::closed("engine closed"))
            }
            _ => {
                return Err(ClaudeError::control_protocol(
                    "control protocol not initialized",
                ))
            }
        }
        self.inner
            .send_control_request(request, self.inner.control_timeout)
            .await
    }

    /// Write one JSON value as a line on the transport
    pub async fn write_message(&self, message: &serde_json::Value) -> Result<()> {
        if matches!(self.state(), EngineState::Closing | EngineState::Closed) {
            return Err(ClaudeError::closed("engine closed"));
        }
        self.inner.write_line(format!("{message}\n")).await
    }

    /// Feed a stream of user messages to the CLI in the background
    ///
    /// When the stream ends and the CLI may still call back (hooks, a
    /// permission callback, embedded servers), input stays open until the
    /// first result arrives or the initialize timeout passes.
    pub fn stream_input<S>(&self, stream: S)
    where
        S: Stream<Item = serde_json::Value> + Send + 'static,
    {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let cancel = inner.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = inner.feed(stream) => {}
            }
        });
        if let Some(previous) = take_slot(&self.stream_task) {
            previous.abort();
        }
        put_slot(&self.stream_task, task);
    }

    /// Close the input direction of the transport
    pub async fn end_input(&self) -> Result<()> {
        self.inner.end_input().await
    }

    /// Next conversation message; `None` once the stream ended and drained
    pub async fn next_message(&self) -> Option<Result<Message>> {
        self.message_rx.lock().await.recv().await
    }

    /// All remaining conversation messages
    pub fn receive_messages(&self) -> impl Stream<Item = Result<Message>> + '_ {
        async_stream::stream! {
            while let Some(item) = self.next_message().await {
                yield item;
            }
        }
    }

    /// Messages up to and including the next result message
    pub fn receive_response(&self) -> impl Stream<Item = Result<Message>> + '_ {
        async_stream::stream! {
            while let Some(item) = self.next_message().await {
                let done = matches!(&item, Ok(message) if message.is_result());
                yield item;
                if done {
                    break;
                }
            }
        }
    }

    /// Shut everything down
    ///
    /// Pending requests fail with `Closed`; messages already queued can still
    /// be read, after which [`next_message`](Self::next_message) returns
    /// `None`. Calling again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let previous = self.inner.state.swap(EngineState::Closing as u8, Ordering::SeqCst);
        if previous >= EngineState::Closing as u8 {
            self.inner.state.store(previous, Ordering::SeqCst);
            return Ok(());
        }

        self.inner.cancel.cancel();
        if let Some(task) = take_slot(&self.stream_task) {
            task.abort();
        }
        if let Some(task) = take_slot(&self.reader_task) {
            task.abort();
        }
        drop(take_slot(&self.message_tx));

        let failed = self.inner.protocol.shutdown(ShutdownReason::Closed).await;
        if failed > 0 {
            tracing::debug!(failed, "Failed pending control requests on close");
        }

        let result = self.inner.transport.lock().await.close().await;
        self.inner.set_state(EngineState::Closed);
        tracing::debug!("Control engine closed");
        result
    }
}

impl Drop for ControlEngine {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        if let Some(task) = take_slot(&self.stream_task) {
            task.abort();
        }
        if let Some(task) = take_slot(&self.reader_task) {
            task.abort();
        }
    }
}

impl EngineInner {
    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: EngineState, to: EngineState) {
        let _ = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn has_inbound_handlers(&self) -> bool {
        !self.hooks.is_empty() || self.permissions.has_callback() || !self.sdk_servers.is_empty()
    }

    /// Write one line; gives up, releasing the transport lock, once the
    /// engine closes
    async fn write_line(&self, line: String) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClaudeError::closed("engine closed during write")),
            result = async { self.transport.lock().await.write(&line).await } => result,
        }
    }

    async fn end_input(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClaudeError::closed("engine closed")),
            result = async { self.transport.lock().await.end_input().await } => result,
        }
    }

    async fn write_frame(&self, frame: &ControlMessage) -> Result<()> {
        let line = self.protocol.serialize_message(frame)?;
        self.write_line(line).await
    }

    async fn send_control_request(
        &self,
        request: ControlRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let subtype = request.subtype();
        let id = self.protocol.next_request_id();
        let response_rx = self.protocol.register(id.clone(), subtype).await?;

        tracing::debug!(request_id = %id, subtype, "Sending control request");
        let frame = ProtocolHandler::request_frame(id.clone(), request);

        // Deadline covers the write as well as the reply
        let exchange = async {
            self.write_frame(&frame).await?;
            response_rx
                .await
                .unwrap_or_else(|_| Err(ClaudeError::closed("control request abandoned")))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => {
                self.protocol.forget(&id).await;
                Err(e)
            }
            Err(_) => {
                self.protocol.forget(&id).await;
                tracing::warn!(request_id = %id, subtype, "Control request timed out");
                Err(ClaudeError::timeout(format!(
                    "Control request timeout: {subtype} after {timeout:?}"
                )))
            }
        }
    }

    /// Push to the consumer queue, giving up if the engine closes first
    async fn deliver(&self, tx: &mpsc::Sender<Result<Message>>, item: Result<Message>) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = tx.send(item) => sent.is_ok(),
        }
    }

    async fn run_reader(
        self: Arc<Self>,
        mut frames: mpsc::Receiver<Result<serde_json::Value>>,
        message_tx: mpsc::Sender<Result<Message>>,
    ) {
        let end_reason = loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                frame = frames.recv() => frame,
            };

            match frame {
                None => break Some("end of stream".to_string()),
                Some(Err(e)) if e.is_terminal() => {
                    let reason = e.to_string();
                    tracing::warn!(error = %e, "Transport failed");
                    self.deliver(&message_tx, Err(e)).await;
                    break Some(reason);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Dropping undecodable frame");
                    if !self.deliver(&message_tx, Err(e)).await && self.cancel.is_cancelled() {
                        break None;
                    }
                }
                Some(Ok(value)) => {
                    if !self.route(value, &message_tx).await && self.cancel.is_cancelled() {
                        break None;
                    }
                }
            }
        };

        if let Some(reason) = end_reason {
            let failed = self
                .protocol
                .shutdown(ShutdownReason::StreamEnded(reason.clone()))
                .await;
            tracing::debug!(failed, reason = %reason, "Reader finished");
        }
    }

    async fn route(self: &Arc<Self>, value: serde_json::Value, tx: &mpsc::Sender<Result<Message>>) -> bool {
        match InboundFrame::classify(value) {
            InboundFrame::Conversation(value) => {
                let item = parse_message(value);
                if let Ok(ref message) = item {
                    if message.is_result() {
                        self.first_result.send_replace(true);
                    }
                }
                return self.deliver(tx, item).await;
            }
            InboundFrame::Response(response) => {
                self.protocol.resolve(response).await;
            }
            InboundFrame::MalformedResponse { request_id, reason } => match request_id {
                Some(id) => {
                    self.protocol
                        .complete(
                            &id,
                            Err(ClaudeError::control_protocol(format!(
                                "Malformed control response: {reason}"
                            ))),
                        )
                        .await;
                }
                None => tracing::warn!(%reason, "Discarding malformed control response"),
            },
            InboundFrame::Request {
                request_id,
                request,
            } => {
                let inner = self.clone();
                tokio::spawn(async move { inner.handle_inbound(request_id, request).await });
            }
            InboundFrame::MalformedRequest { request_id, reason } => {
                tracing::warn!(request_id = ?request_id, %reason, "Malformed control request");
                let inner = self.clone();
                tokio::spawn(async move {
                    let frame = ProtocolHandler::error_frame(
                        request_id,
                        format!("Malformed control request: {reason}"),
                    );
                    inner.reply(frame).await;
                });
            }
            InboundFrame::Cancel(request_id) => {
                tracing::debug!(request_id = ?request_id, "Ignoring control_cancel_request");
            }
        }
        true
    }

    async fn handle_inbound(self: Arc<Self>, request_id: Option<RequestId>, request: ControlRequest) {
        let subtype = request.subtype();
        tracing::debug!(request_id = ?request_id, subtype, "Handling control request");

        let outcome = AssertUnwindSafe(self.dispatch(request)).catch_unwind().await;
        let frame = match outcome {
            Ok(Ok(payload)) => ProtocolHandler::success_frame(request_id, payload),
            Ok(Err(e)) => {
                tracing::warn!(subtype, error = %e, "Control request handler failed");
                ProtocolHandler::error_frame(request_id, e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!(subtype, %message, "Control request handler panicked");
                ProtocolHandler::error_frame(request_id, format!("Handler panicked: {message}"))
            }
        };
        self.reply(frame).await;
    }

    async fn reply(&self, frame: ControlMessage) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.write_frame(&frame).await {
            tracing::warn!(error = %e, "Failed to send control response");
        }
    }

    async fn dispatch(&self, request: ControlRequest) -> Result<serde_json::Value> {
        match request {
            ControlRequest::HookCallback {
                callback_id,
                input,
                tool_use_id,
            } => {
                tracing::trace!(callback_id = %callback_id, "Invoking hook");
                let context = HookContext {
                    signal: self.cancel.child_token(),
                };
                let output = self
                    .hooks
                    .invoke(&callback_id, input, tool_use_id, context)
                    .await?;
                Ok(serde_json::to_value(output)?)
            }
            ControlRequest::CanUseTool {
                tool_name,
                input,
                permission_suggestions,
                blocked_path,
            } => {
                let context = permission_context(permission_suggestions, blocked_path);
                let decision = self
                    .permissions
                    .can_use_tool(tool_name, input.clone(), context)
                    .await?;
                Ok(decision_payload(decision, input))
            }
            ControlRequest::McpMessage {
                server_name,
                message,
            } => {
                let response = match self.sdk_servers.get(&server_name) {
                    Some(server) => server.handle_message(message).await,
                    None => {
                        tracing::warn!(server_name = %server_name, "mcp_message for unknown server");
                        let id = message.get("id").cloned().unwrap_or(serde_json::Value::Null);
                        JsonRpcResponse::error(id, McpError::server_not_found(&server_name)).into_value()
                    }
                };
                Ok(serde_json::json!({ "mcp_response": response }))
            }
            other => Err(ClaudeError::control_protocol(format!(
                "Unsupported control request subtype: {}",
                other.subtype()
            ))),
        }
    }

    async fn feed<S>(&self, stream: S)
    where
        S: Stream<Item = serde_json::Value> + Send,
    {
        futures::pin_mut!(stream);
        while let Some(message) = stream.next().await {
            if let Err(e) = self.write_line(format!("{message}\n")).await {
                tracing::warn!(error = %e, "Stopping input stream after write failure");
                return;
            }
        }

        if self.has_inbound_handlers() {
            let mut seen = self.first_result.subscribe();
            let timed_out = tokio::time::timeout(self.initialize_timeout, seen.wait_for(|seen| *seen))
                .await
                .is_err();
            if timed_out {
                tracing::debug!("No result before closing input");
            }
        }

        if let Err(e) = self.end_input().await {
            tracing::debug!(error = %e, "Failed to close input");
        }
    }
}
