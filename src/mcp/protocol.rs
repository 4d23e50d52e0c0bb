//! MCP JSON-RPC 2.0 message types

use serde::{Deserialize, Serialize};

/// JSON-RPC protocol version string
pub const JSONRPC_VERSION: &str = "2.0";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// JSONRPC request structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSONRPC version (always "2.0")
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Request ID (absent for notifications)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request with an id
    pub fn new(
        id: impl Into<serde_json::Value>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Whether this is a notification (no reply expected by JSON-RPC)
    pub fn is_notification(&self) -> bool {
        self.method.starts_with("notifications/")
    }
}

/// JSONRPC response structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSONRPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID (matches the request, `null` for notifications)
    pub id: serde_json::Value,
    /// Result (present on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error (present on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl JsonRpcResponse {
    /// Create a successful response
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: serde_json::Value, error: McpError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Convert to a JSON value for embedding in a control response
    pub fn into_value(self) -> serde_json::Value {
        let id = self.id.clone();
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "error": {"code": McpError::INTERNAL_ERROR, "message": e.to_string()},
            })
        })
    }
}

/// JSONRPC error structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl McpError {
    /// Malformed request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method or tool
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Missing or malformed parameters
    pub const INVALID_PARAMS: i32 = -32602;
    /// Handler failure
    pub const INTERNAL_ERROR: i32 = -32603;

    fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Invalid request error (-32600)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_code(Self::INVALID_REQUEST, message)
    }

    /// Method not found error (-32601)
    pub fn method_not_found(method: &str) -> Self {
        Self::with_code(Self::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// Unknown tool, reported as method not found (-32601)
    pub fn tool_not_found(tool_name: &str) -> Self {
        Self::with_code(Self::METHOD_NOT_FOUND, format!("Tool not found: {tool_name}"))
    }

    /// Method not found error (-32601) for an unregistered server
    pub fn server_not_found(server_name: &str) -> Self {
        Self::with_code(Self::METHOD_NOT_FOUND, format!("Server '{server_name}' not found"))
    }

    /// Invalid params error (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_code(Self::INVALID_PARAMS, message)
    }

    /// Internal error (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_code(Self::INTERNAL_ERROR, message)
    }
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults_version() {
        let request: JsonRpcRequest =
            serde_json::from_value(json!({"id": 3, "method": "tools/list"})).unwrap();
        assert_eq!(request.jsonrpc, "2.0");
        assert!(!request.is_notification());
    }

    #[test]
    fn test_error_response_omits_result() {
        let response = JsonRpcResponse::error(json!(1), McpError::method_not_found("x/y"));
        let value = response.into_value();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32601);
        assert_eq!(value["error"]["message"], "Method not found: x/y");
    }

    #[test]
    fn test_mcp_error_codes() {
        assert_eq!(McpError::invalid_request("x").code, -32600);
        assert_eq!(McpError::method_not_found("test").code, -32601);
        assert_eq!(McpError::tool_not_found("test").code, -32601);
        let missing = McpError::server_not_found("calc");
        assert_eq!(missing.code, -32601);
        assert_eq!(missing.message, "Server 'calc' not found");
        assert_eq!(McpError::invalid_params("test").code, -32602);
        assert_eq!(McpError::internal_error("test").code, -32603);
    }
}
