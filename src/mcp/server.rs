//! SDK MCP Server Implementation
//!
//! Answers the JSON-RPC requests the CLI forwards through `mcp_message`
//! control requests.

use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;

use super::protocol::{JsonRpcRequest, JsonRpcResponse, McpError};
use super::tool::SdkMcpTool;

/// MCP protocol revision reported by `initialize`
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// An in-process MCP server that hosts custom tools
///
/// Built once through the consuming builder, then shared behind an `Arc`
/// and queried concurrently.
///
/// # Example
///
/// ```rust
/// use claude_agent_control::mcp::{SdkMcpServer, SdkMcpTool, ToolResult};
///
/// let server = SdkMcpServer::new("calculator")
///     .version("1.0.0")
///     .tool(SdkMcpTool::untyped("ping", "Reply with pong", |_| async {
///         Ok(ToolResult::text("pong"))
///     }));
/// assert_eq!(server.list_tools().len(), 1);
/// ```
pub struct SdkMcpServer {
    name: String,
    version: String,
    tools: BTreeMap<String, SdkMcpTool>,
}

impl SdkMcpServer {
    /// Create a new MCP server with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            tools: BTreeMap::new(),
        }
    }

    /// Set the server version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Register a tool; a tool with the same name is replaced
    pub fn tool(mut self, tool: SdkMcpTool) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    /// Register multiple tools at once
    pub fn tools(self, tools: Vec<SdkMcpTool>) -> Self {
        tools.into_iter().fold(self, |server, tool| server.tool(tool))
    }

    /// Get the server name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the server version
    pub fn server_version(&self) -> &str {
        &self.version
    }

    /// Get a tool by name
    pub fn get_tool(&self, name: &str) -> Option<&SdkMcpTool> {
        self.tools.get(name)
    }

    /// All registered tools, sorted by name
    pub fn list_tools(&self) -> Vec<&SdkMcpTool> {
        self.tools.values().collect()
    }

    /// Answer a raw JSON-RPC message
    pub async fn handle_message(&self, message: serde_json::Value) -> serde_json::Value {
        let id = message.get("id").cloned().unwrap_or(serde_json::Value::Null);
        let response = match serde_json::from_value::<JsonRpcRequest>(message) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => JsonRpcResponse::error(id, McpError::invalid_request(e.to_string())),
        };
        response.into_value()
    }

    /// Handle an MCP JSON-RPC request
    ///
    /// Never fails: every problem becomes a JSON-RPC error response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let request_id = request.id.clone().unwrap_or(serde_json::Value::Null);
        tracing::debug!(server_name = %self.name, method = %request.method, "MCP request");

        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                request_id,
                serde_json::json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": self.name, "version": self.version},
                }),
            ),
            "tools/list" => {
                let tools: Vec<_> = self.tools.values().map(|tool| tool.to_tool_info()).collect();
                JsonRpcResponse::success(request_id, serde_json::json!({ "tools": tools }))
            }
            "tools/call" => self.handle_tools_call(request_id, request.params).await,
            _ if request.is_notification() => {
                JsonRpcResponse::success(request_id, serde_json::json!({}))
            }
            method => JsonRpcResponse::error(request_id, McpError::method_not_found(method)),
        }
    }

    async fn handle_tools_call(
        &self,
        request_id: serde_json::Value,
        params: Option<serde_json::Value>,
    ) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::error(
                request_id,
                McpError::invalid_params("tools/call requires parameters"),
            );
        };

        let Some(tool_name) = params.get("name").and_then(|n| n.as_str()) else {
            return JsonRpcResponse::error(
                request_id,
                McpError::invalid_params("Missing tool name in parameters"),
            );
        };

        let Some(tool) = self.tools.get(tool_name) else {
            return JsonRpcResponse::error(request_id, McpError::tool_not_found(tool_name));
        };

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let outcome = AssertUnwindSafe(tool.call(arguments)).catch_unwind().await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                tracing::warn!(server_name = %self.name, tool = tool_name, %error, "Tool call failed");
                return JsonRpcResponse::error(request_id, error);
            }
            Err(_) => {
                tracing::error!(server_name = %self.name, tool = tool_name, "Tool handler panicked");
                return JsonRpcResponse::error(
                    request_id,
                    McpError::internal_error(format!("Tool '{tool_name}' panicked")),
                );
            }
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(request_id, value),
            Err(e) => JsonRpcResponse::error(
                request_id,
                McpError::internal_error(format!("Failed to serialize result: {e}")),
            ),
        }
    }
}

impl std::fmt::Debug for SdkMcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkMcpServer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClaudeError;
    use crate::mcp::{ParamKind, ToolParam, ToolResult};
    use serde_json::json;

    fn echo_tool(name: &str) -> SdkMcpTool {
        SdkMcpTool::new(
            name,
            format!("Test tool {name}"),
            json!({"type": "object"}),
            |input| async move {
                let text = input["text"].as_str().unwrap_or("default");
                Ok(ToolResult::text(text))
            },
        )
    }

    fn call(name: &str, arguments: serde_json::Value) -> JsonRpcRequest {
        JsonRpcRequest::new(1, "tools/call", Some(json!({"name": name, "arguments": arguments})))
    }

    #[tokio::test]
    async fn test_initialize() {
        let server = SdkMcpServer::new("calc").version("2.1.0");
        let response = server
            .handle_request(JsonRpcRequest::new(0, "initialize", Some(json!({}))))
            .await;

        assert_eq!(
            response.result.unwrap(),
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "calc", "version": "2.1.0"}
            })
        );
    }

    #[tokio::test]
    async fn test_notification_is_acknowledged() {
        let server = SdkMcpServer::new("calc");
        let value = server
            .handle_message(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        assert_eq!(value["result"], json!({}));
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn test_tools_list_sorted() {
        let server = SdkMcpServer::new("test")
            .tool(echo_tool("zeta"))
            .tools(vec![echo_tool("alpha"), echo_tool("mid")]);

        let response = server
            .handle_request(JsonRpcRequest::new(1, "tools/list", None))
            .await;
        let result = response.result.unwrap();
        let names: Vec<&str> = result["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_tools_call_request() {
        let server = SdkMcpServer::new("test").tool(echo_tool("echo"));
        let response = server.handle_request(call("echo", json!({"text": "hello"}))).await;

        let result = response.result.unwrap();
        assert_eq!(result["content"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_tool_level_error_is_success_response() {
        let server = SdkMcpServer::new("test").tool(SdkMcpTool::untyped("fail", "Fails", |_| async {
            Ok(ToolResult::error("bad input"))
        }));
        let response = server.handle_request(call("fail", json!({}))).await;

        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["isError"], true);
    }

    #[tokio::test]
    async fn test_error_codes() {
        let server = SdkMcpServer::new("test")
            .tool(SdkMcpTool::with_params(
                "needs",
                "Needs x",
                vec![ToolParam::required("x", ParamKind::Integer)],
                |_| async { Ok(ToolResult::text("ok")) },
            ))
            .tool(SdkMcpTool::untyped("boom", "Fails", |_| async {
                Err(ClaudeError::mcp("kaput"))
            }));

        let unknown_method = server
            .handle_request(JsonRpcRequest::new(1, "resources/list", None))
            .await;
        assert_eq!(unknown_method.error.unwrap().code, -32601);

        let unknown_tool = server.handle_request(call("nonexistent", json!({}))).await;
        assert_eq!(unknown_tool.error.unwrap().code, -32601);

        let no_params = server
            .handle_request(JsonRpcRequest::new(1, "tools/call", None))
            .await;
        assert_eq!(no_params.error.unwrap().code, -32602);

        let missing_arg = server.handle_request(call("needs", json!({}))).await;
        assert_eq!(missing_arg.error.unwrap().code, -32602);

        let handler_err = server.handle_request(call("boom", json!({}))).await.error.unwrap();
        assert_eq!(handler_err.code, -32603);
        assert!(handler_err.message.contains("kaput"));
    }

    #[tokio::test]
    async fn test_panicking_tool_is_contained() {
        let server = SdkMcpServer::new("test").tool(SdkMcpTool::untyped("panic", "Panics", |input| async move {
            if input.is_object() {
                panic!("tool exploded");
            }
            Ok(ToolResult::text("unreachable"))
        }));
        let response = server.handle_request(call("panic", json!({}))).await;
        assert_eq!(response.error.unwrap().code, -32603);
    }

    #[tokio::test]
    async fn test_malformed_message() {
        let server = SdkMcpServer::new("test");
        let value = server.handle_message(json!({"id": 9, "params": {}})).await;
        assert_eq!(value["id"], 9);
        assert_eq!(value["error"]["code"], -32600);
    }
}
