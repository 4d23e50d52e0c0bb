//! In-memory transport and a scripted CLI peer for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use claude_agent_control::control::ControlEngine;
use claude_agent_control::{ClaudeAgentOptions, ClaudeError, ClaudeSDKClient, Result, Transport};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// How long a test waits for the engine to write something
pub const PEER_WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Transport whose far end is a [`Peer`]
pub struct MockTransport {
    written: mpsc::UnboundedSender<String>,
    inbound: Option<mpsc::Receiver<Result<Value>>>,
    ready: bool,
    input_closed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
}

/// The test's side of a [`MockTransport`], standing in for the CLI
pub struct Peer {
    written: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::Sender<Result<Value>>>,
    input_closed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
}

pub fn mock_transport() -> (MockTransport, Peer) {
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    let input_closed = Arc::new(AtomicBool::new(false));
    let closed = Arc::new(AtomicBool::new(false));
    let stall_writes = Arc::new(AtomicBool::new(false));

    let transport = MockTransport {
        written: written_tx,
        inbound: Some(inbound_rx),
        ready: false,
        input_closed: input_closed.clone(),
        closed: closed.clone(),
        stall_writes: stall_writes.clone(),
    };
    let peer = Peer {
        written: written_rx,
        inbound: Some(inbound_tx),
        input_closed,
        closed,
        stall_writes,
    };
    (transport, peer)
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        if !self.ready || self.input_closed.load(Ordering::SeqCst) {
            return Err(ClaudeError::connection("mock transport is not writable"));
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            // A CLI that stopped draining its stdin
            std::future::pending::<()>().await;
        }
        self.written
            .send(data.to_string())
            .map_err(|_| ClaudeError::connection("peer went away"))
    }

    async fn end_input(&mut self) -> Result<()> {
        self.input_closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read_messages(&mut self) -> mpsc::Receiver<Result<Value>> {
        match self.inbound.take() {
            Some(rx) => rx,
            None => mpsc::channel(1).1,
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn close(&mut self) -> Result<()> {
        self.ready = false;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Peer {
    /// Next line the engine wrote, decoded
    pub async fn next_frame(&mut self) -> Value {
        let line = tokio::time::timeout(PEER_WAIT, self.written.recv())
            .await
            .expect("engine wrote nothing in time")
            .expect("transport dropped");
        assert!(line.ends_with('\n'), "frame not newline-terminated: {line:?}");
        serde_json::from_str(line.trim_end()).expect("engine wrote invalid JSON")
    }

    /// Assert nothing is written for `wait`
    pub async fn assert_silent(&mut self, wait: Duration) {
        if let Ok(Some(line)) = tokio::time::timeout(wait, self.written.recv()).await {
            panic!("unexpected frame: {line}");
        }
    }

    /// Read the next frame, which must be a control request of `subtype`
    ///
    /// Returns the request id and the request body.
    pub async fn expect_request(&mut self, subtype: &str) -> (String, Value) {
        let frame = self.next_frame().await;
        assert_eq!(frame["type"], "control_request", "frame: {frame}");
        assert_eq!(frame["request"]["subtype"], subtype, "frame: {frame}");
        let id = frame["request_id"].as_str().expect("request_id").to_string();
        (id, frame["request"].clone())
    }

    /// Read the next frame, which must be a control response
    pub async fn expect_response(&mut self) -> Value {
        let frame = self.next_frame().await;
        assert_eq!(frame["type"], "control_response", "frame: {frame}");
        frame["response"].clone()
    }

    /// Answer the `initialize` handshake; returns the request body
    pub async fn answer_initialize(&mut self) -> Value {
        let (id, request) = self.expect_request("initialize").await;
        self.reply_success(&id, json!({"commands": [], "output_style": "default"}))
            .await;
        request
    }

    pub async fn send(&self, frame: Value) {
        self.send_item(Ok(frame)).await;
    }

    pub async fn send_item(&self, item: Result<Value>) {
        self.inbound
            .as_ref()
            .expect("peer already hung up")
            .send(item)
            .await
            .expect("engine stopped reading");
    }

    pub async fn reply_success(&self, request_id: &str, response: Value) {
        self.send(json!({
            "type": "control_response",
            "response": {"subtype": "success", "request_id": request_id, "response": response}
        }))
        .await;
    }

    pub async fn reply_error(&self, request_id: &str, error: &str) {
        self.send(json!({
            "type": "control_response",
            "response": {"subtype": "error", "request_id": request_id, "error": error}
        }))
        .await;
    }

    /// Send a control request from the CLI side
    pub async fn request(&self, request_id: Option<&str>, request: Value) {
        self.send(json!({"type": "control_request", "request_id": request_id, "request": request}))
            .await;
    }

    /// End of stream, as if the CLI exited
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Make every later write block forever
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    pub fn input_closed(&self) -> bool {
        self.input_closed.load(Ordering::SeqCst)
    }

    pub fn transport_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub fn assistant(text: &str) -> Value {
    json!({
        "type": "assistant",
        "message": {"model": "claude-test", "content": [{"type": "text", "text": text}]},
        "session_id": "default"
    })
}

pub fn result_message() -> Value {
    json!({
        "type": "result",
        "subtype": "success",
        "duration_ms": 12,
        "duration_api_ms": 10,
        "is_error": false,
        "num_turns": 1,
        "session_id": "default",
        "total_cost_usd": 0.001
    })
}

/// Engine over a mock transport, started and initialized
pub async fn ready_engine(options: &ClaudeAgentOptions) -> (ControlEngine, Peer) {
    let (mut transport, mut peer) = mock_transport();
    transport.connect().await.expect("connect");
    let engine = ControlEngine::new(Box::new(transport), options);
    engine.start().await.expect("start");

    let (info, _) = tokio::join!(engine.initialize(), peer.answer_initialize());
    info.expect("initialize");
    (engine, peer)
}

/// Client over a mock transport with the handshake answered
pub async fn connected_client(options: ClaudeAgentOptions) -> (ClaudeSDKClient, Peer) {
    let (transport, mut peer) = mock_transport();
    let (client, _) = tokio::join!(
        ClaudeSDKClient::with_transport(options, Box::new(transport)),
        peer.answer_initialize()
    );
    (client.expect("client"), peer)
}
