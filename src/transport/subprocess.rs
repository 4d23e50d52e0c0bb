//! Subprocess transport implementation using Claude Code CLI

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use super::codec::{JsonAccumulator, LineCodec, RawLine};
use crate::error::{ClaudeError, Result};
use crate::types::{
    ClaudeAgentOptions, McpServerConfig, McpServers, StderrCallback, SystemPrompt,
};
use crate::{Transport, VERSION};

/// Default limit for one JSON frame read from stdout
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024; // 1MB

const STDERR_TAIL_LINES: usize = 64;
const PROCESS_EXIT_GRACE: Duration = Duration::from_secs(5);
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(500);

// Dangerous environment variables that should not be passed to subprocess
const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

// Allowed extra CLI flags (allowlist approach)
const ALLOWED_EXTRA_FLAGS: &[&str] = &["timeout", "retries", "log-level", "cache-dir"];

/// Prompt input type
#[derive(Debug, Clone)]
pub enum PromptInput {
    /// Single string prompt passed on the command line; stdin is closed
    String(String),
    /// Messages are written to stdin as `stream-json`
    Stream,
}

impl From<String> for PromptInput {
    fn from(s: String) -> Self {
        PromptInput::String(s)
    }
}

impl From<&str> for PromptInput {
    fn from(s: &str) -> Self {
        PromptInput::String(s.to_string())
    }
}

type StderrTail = Arc<std::sync::Mutex<VecDeque<String>>>;

/// Subprocess transport for Claude Code CLI
pub struct SubprocessTransport {
    prompt: PromptInput,
    options: ClaudeAgentOptions,
    cli_path: PathBuf,
    process: Arc<Mutex<Option<Child>>>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    ready: Arc<AtomicBool>,
    max_buffer_size: usize,
    channel_capacity: usize,
    stderr_tail: StderrTail,
    stderr_done: Option<oneshot::Receiver<()>>,
    reader_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl SubprocessTransport {
    /// Create a new subprocess transport
    ///
    /// # Arguments
    /// * `prompt` - The prompt input (string or stream)
    /// * `options` - Configuration options
    /// * `cli_path` - Optional path to Claude Code CLI (will search if None)
    ///
    /// # Errors
    /// Returns `CliNotFound` if no path is given and the CLI cannot be found
    pub fn new(
        prompt: PromptInput,
        options: ClaudeAgentOptions,
        cli_path: Option<PathBuf>,
    ) -> Result<Self> {
        let cli_path = match cli_path {
            Some(path) => path,
            None => Self::find_cli()?,
        };

        let max_buffer_size = options.max_buffer_size.unwrap_or(DEFAULT_MAX_BUFFER_SIZE);
        let channel_capacity = options.effective_message_buffer_capacity();

        Ok(Self {
            prompt,
            options,
            cli_path,
            process: Arc::new(Mutex::new(None)),
            stdin: None,
            stdout: None,
            ready: Arc::new(AtomicBool::new(false)),
            max_buffer_size,
            channel_capacity,
            stderr_tail: Arc::new(std::sync::Mutex::new(VecDeque::new())),
            stderr_done: None,
            reader_task: None,
            stderr_task: None,
        })
    }

    /// Find Claude Code CLI binary
    fn find_cli() -> Result<PathBuf> {
        if let Ok(path) = which::which("claude") {
            return Ok(path);
        }

        let home = env::var("HOME").unwrap_or_else(|_| String::from("/root"));
        let home = PathBuf::from(home);
        let locations = [
            home.join(".npm-global/bin/claude"),
            PathBuf::from("/usr/local/bin/claude"),
            home.join(".local/bin/claude"),
            home.join("node_modules/.bin/claude"),
            home.join(".yarn/bin/claude"),
            home.join(".claude/local/claude"),
        ];

        locations
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(ClaudeError::cli_not_found)
    }

    /// Last lines the CLI wrote to stderr, oldest first
    pub fn stderr_tail(&self) -> Vec<String> {
        snapshot(&self.stderr_tail)
    }

    /// Build CLI command with all arguments
    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.cli_path);

        cmd.arg("--print");
        cmd.arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");

        if let Some(ref system_prompt) = self.options.system_prompt {
            match system_prompt {
                SystemPrompt::String(s) => {
                    cmd.arg("--system-prompt").arg(s);
                }
                SystemPrompt::Preset(preset) => {
                    if let Some(ref append) = preset.append {
                        cmd.arg("--append-system-prompt").arg(append);
                    }
                }
            }
        }

        if !self.options.allowed_tools.is_empty() {
            let tools: Vec<&str> = self.options.allowed_tools.iter().map(|t| t.as_str()).collect();
            cmd.arg("--allowedTools").arg(tools.join(","));
        }

        if let Some(max_turns) = self.options.max_turns {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }

        if !self.options.disallowed_tools.is_empty() {
            let tools: Vec<&str> = self
                .options
                .disallowed_tools
                .iter()
                .map(|t| t.as_str())
                .collect();
            cmd.arg("--disallowedTools").arg(tools.join(","));
        }

        if let Some(ref model) = self.options.model {
            cmd.arg("--model").arg(model);
        }

        // Permission prompts travel over the control protocol when a callback is set
        if self.options.can_use_tool.is_some() {
            cmd.arg("--permission-prompt-tool").arg("stdio");
        } else if let Some(ref tool) = self.options.permission_prompt_tool_name {
            cmd.arg("--permission-prompt-tool").arg(tool);
        }

        if let Some(mode) = self.options.permission_mode {
            cmd.arg("--permission-mode").arg(mode.as_str());
        }

        if self.options.continue_conversation {
            cmd.arg("--continue");
        }

        if let Some(ref session_id) = self.options.resume {
            cmd.arg("--resume").arg(session_id.as_str());
        }

        if let Some(ref settings) = self.options.settings {
            cmd.arg("--settings").arg(settings);
        }

        for dir in &self.options.add_dirs {
            cmd.arg("--add-dir").arg(dir);
        }

        match &self.options.mcp_servers {
            McpServers::Dict(servers) if !servers.is_empty() => {
                let config_map: HashMap<&String, serde_json::Value> = servers
                    .iter()
                    .map(|(name, config)| (name, Self::serialize_mcp_config(name, config)))
                    .collect();
                let config_json = serde_json::json!({ "mcpServers": config_map });
                cmd.arg("--mcp-config").arg(config_json.to_string());
            }
            McpServers::Path(path) => {
                cmd.arg("--mcp-config").arg(path);
            }
            _ => {}
        }

        if self.options.include_partial_messages {
            cmd.arg("--include-partial-messages");
        }

        if self.options.fork_session {
            cmd.arg("--fork-session");
        }

        if let Some(ref agents) = self.options.agents {
            match serde_json::to_string(agents) {
                Ok(agents_json) => {
                    cmd.arg("--agents").arg(agents_json);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping unserializable agent definitions"),
            }
        }

        let sources = self
            .options
            .setting_sources
            .as_ref()
            .map(|sources| {
                sources
                    .iter()
                    .map(|s| match s {
                        crate::types::SettingSource::User => "user",
                        crate::types::SettingSource::Project => "project",
                        crate::types::SettingSource::Local => "local",
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        cmd.arg("--setting-sources").arg(sources);

        for (flag, value) in &self.options.extra_args {
            if !ALLOWED_EXTRA_FLAGS.contains(&flag.as_str()) {
                tracing::warn!(flag = %flag, "Ignoring extra CLI flag outside the allowlist");
                continue;
            }
            cmd.arg(format!("--{flag}"));
            if let Some(v) = value {
                cmd.arg(v);
            }
        }

        match &self.prompt {
            PromptInput::Stream => {
                cmd.arg("--input-format").arg("stream-json");
            }
            PromptInput::String(s) => {
                cmd.arg("--").arg(s);
            }
        }

        cmd
    }

    /// Serialize MCP config for CLI
    fn serialize_mcp_config(name: &str, config: &McpServerConfig) -> serde_json::Value {
        match config {
            McpServerConfig::Stdio(stdio) => {
                let mut obj = serde_json::json!({ "command": stdio.command });
                if let Some(ref args) = stdio.args {
                    obj["args"] = serde_json::json!(args);
                }
                if let Some(ref env) = stdio.env {
                    obj["env"] = serde_json::json!(env);
                }
                if let Some(ref server_type) = stdio.server_type {
                    obj["type"] = serde_json::json!(server_type);
                }
                obj
            }
            McpServerConfig::Sse(sse) => serde_json::json!({
                "type": sse.server_type,
                "url": sse.url,
                "headers": sse.headers,
            }),
            McpServerConfig::Http(http) => serde_json::json!({
                "type": http.server_type,
                "url": http.url,
                "headers": http.headers,
            }),
            // The instance itself stays in-process; the CLI only learns its name
            McpServerConfig::Sdk(_) => serde_json::json!({
                "type": "sdk",
                "name": name,
            }),
        }
    }

    fn spawn_stderr_reader(
        &mut self,
        stderr: ChildStderr,
        callback: Option<StderrCallback>,
    ) -> JoinHandle<()> {
        let tail = self.stderr_tail.clone();
        let max_line = self.max_buffer_size;
        let (done_tx, done_rx) = oneshot::channel();
        self.stderr_done = Some(done_rx);

        tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LineCodec::new(max_line));
            while let Some(item) = lines.next().await {
                let line = match item {
                    Ok(RawLine::Line(line)) => line,
                    Ok(RawLine::Oversized) | Ok(RawLine::Invalid(_)) => continue,
                    Err(e) => {
                        tracing::debug!(error = %e, "stderr read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                if let Ok(mut tail) = tail.lock() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());
                }

                match &callback {
                    Some(cb) => cb(line),
                    None => tracing::debug!(target: "claude_cli::stderr", "{line}"),
                }
            }
            let _ = done_tx.send(());
        })
    }
}

fn snapshot(tail: &StderrTail) -> Vec<String> {
    tail.lock()
        .map(|tail| tail.iter().cloned().collect())
        .unwrap_or_default()
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.process.lock().await.is_some() {
            return Ok(());
        }

        let mut cmd = self.build_command();

        let mut process_env = env::vars().collect::<HashMap<_, _>>();
        for (key, value) in &self.options.env {
            if DANGEROUS_ENV_VARS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Refusing to override environment variable");
                continue;
            }
            process_env.insert(key.clone(), value.clone());
        }

        process_env.insert("CLAUDE_CODE_ENTRYPOINT".to_string(), "sdk-rust".to_string());
        process_env.insert("CLAUDE_AGENT_SDK_VERSION".to_string(), VERSION.to_string());
        if self.options.enable_file_checkpointing {
            process_env.insert(
                "CLAUDE_CODE_ENABLE_SDK_FILE_CHECKPOINTING".to_string(),
                "true".to_string(),
            );
        }

        if let Some(ref cwd) = self.options.cwd {
            process_env.insert("PWD".to_string(), cwd.to_string_lossy().to_string());
            cmd.current_dir(cwd);
        }

        cmd.envs(process_env);

        // Piped stderr keeps the child away from the parent terminal
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(ref cwd) = self.options.cwd {
                if !cwd.exists() {
                    return ClaudeError::connection(format!(
                        "Working directory does not exist: {}",
                        cwd.display()
                    ));
                }
            }
            if e.kind() == std::io::ErrorKind::NotFound {
                return ClaudeError::CliNotFound(format!(
                    "Claude Code not found at: {}",
                    self.cli_path.display()
                ));
            }
            ClaudeError::connection(format!("Failed to start Claude Code: {e}"))
        })?;

        tracing::debug!(cli = %self.cli_path.display(), pid = ?child.id(), "Started Claude Code");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClaudeError::connection("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClaudeError::connection("Failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClaudeError::connection("Failed to get stderr handle"))?;

        let callback = self.options.stderr.clone();
        self.stderr_task = Some(self.spawn_stderr_reader(stderr, callback));

        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        *self.process.lock().await = Some(child);
        self.ready.store(true, Ordering::SeqCst);

        if matches!(self.prompt, PromptInput::String(_)) {
            self.end_input().await?;
        }

        Ok(())
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(ClaudeError::connection("Transport is not ready for writing"));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ClaudeError::transport("Input stream is closed"))?;

        let written = async {
            stdin.write_all(data.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            self.ready.store(false, Ordering::SeqCst);
            return Err(ClaudeError::connection(format!(
                "Failed to write to process stdin: {e}"
            )));
        }
        Ok(())
    }

    async fn end_input(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .shutdown()
                .await
                .map_err(|e| ClaudeError::connection(format!("Failed to close stdin: {e}")))?;
        }
        Ok(())
    }

    fn read_messages(&mut self) -> mpsc::Receiver<Result<serde_json::Value>> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let stdout = self.stdout.take();
        let process = self.process.clone();
        let ready = self.ready.clone();
        let tail = self.stderr_tail.clone();
        let stderr_done = self.stderr_done.take();
        let max_buffer_size = self.max_buffer_size;

        let task = tokio::spawn(async move {
            let Some(stdout) = stdout else {
                let _ = tx
                    .send(Err(ClaudeError::connection(
                        "Not connected - stdout not available",
                    )))
                    .await;
                return;
            };

            // The codec caps a single line; the accumulator caps a value spread over lines
            let mut frames = FramedRead::new(stdout, LineCodec::new(max_buffer_size));
            let mut accumulator = JsonAccumulator::new(max_buffer_size);

            while let Some(item) = frames.next().await {
                let outcome = match item {
                    Ok(RawLine::Line(line)) => accumulator.push(&line),
                    Ok(RawLine::Oversized) => {
                        accumulator.reset();
                        tracing::warn!(limit = max_buffer_size, "Discarding oversized frame");
                        Some(Err(ClaudeError::BufferOverflow {
                            limit: max_buffer_size,
                        }))
                    }
                    Ok(RawLine::Invalid(reason)) => {
                        accumulator.reset();
                        Some(Err(ClaudeError::json_decode(reason)))
                    }
                    Err(e) => {
                        ready.store(false, Ordering::SeqCst);
                        let _ = tx.send(Err(ClaudeError::Io(e))).await;
                        return;
                    }
                };

                if let Some(outcome) = outcome {
                    if tx.send(outcome).await.is_err() {
                        return;
                    }
                }
            }

            ready.store(false, Ordering::SeqCst);
            if let Some(err) = accumulator.finish() {
                let _ = tx.send(Err(err)).await;
            }

            let status = {
                let mut guard = process.lock().await;
                match guard.as_mut() {
                    Some(child) => tokio::time::timeout(PROCESS_EXIT_GRACE, child.wait()).await,
                    None => return,
                }
            };

            match status {
                Ok(Ok(status)) if status.success() => {
                    tracing::debug!("Claude Code exited cleanly");
                }
                Ok(Ok(status)) => {
                    if let Some(done) = stderr_done {
                        let _ = tokio::time::timeout(STDERR_DRAIN_GRACE, done).await;
                    }
                    let lines = snapshot(&tail);
                    let stderr = (!lines.is_empty()).then(|| lines.join("\n"));
                    let code = status.code().unwrap_or(-1);
                    tracing::warn!(exit_code = code, "Claude Code exited with failure");
                    let _ = tx
                        .send(Err(ClaudeError::process(
                            format!("Command failed with exit code {code}"),
                            code,
                            stderr,
                        )))
                        .await;
                }
                Ok(Err(e)) => {
                    let _ = tx.send(Err(ClaudeError::Io(e))).await;
                }
                Err(_) => {
                    tracing::debug!("stdout closed but process is still running");
                }
            }
        });

        self.reader_task = Some(task);
        rx
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.stdout = None;

        let child = self.process.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(PROCESS_EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(?status, "Claude Code exited"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Failed waiting for Claude Code"),
                Err(_) => {
                    tracing::debug!("Claude Code did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        Ok(())
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        self.stdin.take();

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        if let Ok(mut guard) = self.process.try_lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
            }
        }
    }
}
