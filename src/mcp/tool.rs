//! Tool definitions for the embedded MCP server
//!
//! A tool's input schema comes from one of three places: an explicit JSON
//! schema ([`SdkMcpTool::new`]), a list of declared parameters
//! ([`SdkMcpTool::with_params`]), or nothing at all ([`SdkMcpTool::untyped`]).

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use super::protocol::McpError;
use super::{PositionalHandler, ToolHandler};
use crate::error::{ClaudeError, Result};

/// JSON schema type of a declared parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `"string"`
    String,
    /// `"integer"`
    Integer,
    /// `"number"`
    Number,
    /// `"boolean"`
    Boolean,
    /// `"array"`
    Array,
    /// `"object"`
    Object,
}

impl ParamKind {
    /// JSON schema type name
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }
}

/// A declared tool parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParam {
    /// Argument name
    pub name: String,
    /// Schema type
    pub kind: ParamKind,
    /// Whether a call must supply it
    pub required: bool,
    /// Description shown to the model
    pub description: Option<String>,
}

impl ToolParam {
    /// A parameter every call must supply
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: None,
        }
    }

    /// A parameter that may be omitted; the handler then sees `null`
    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    /// Attach a description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

fn schema_for(params: &[ToolParam]) -> serde_json::Value {
    let properties: serde_json::Map<String, serde_json::Value> = params
        .iter()
        .map(|p| {
            let mut prop = serde_json::json!({ "type": p.kind.as_str() });
            if let Some(ref description) = p.description {
                prop["description"] = serde_json::json!(description);
            }
            (p.name.clone(), prop)
        })
        .collect();
    let required: Vec<&str> = params
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

enum Dispatch {
    Raw(ToolHandler),
    Positional {
        params: Vec<ToolParam>,
        handler: PositionalHandler,
    },
}

/// A tool that can be invoked by Claude
///
/// # Example
///
/// ```rust
/// use claude_agent_control::mcp::{ParamKind, SdkMcpTool, ToolParam, ToolResult};
///
/// let add = SdkMcpTool::with_params(
///     "add",
///     "Add two numbers",
///     vec![
///         ToolParam::required("a", ParamKind::Number),
///         ToolParam::required("b", ParamKind::Number),
///     ],
///     |args| async move {
///         let sum = args[0].as_f64().unwrap_or(0.0) + args[1].as_f64().unwrap_or(0.0);
///         Ok(ToolResult::text(sum.to_string()))
///     },
/// );
/// assert_eq!(add.input_schema()["required"][1], "b");
/// ```
pub struct SdkMcpTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    dispatch: Dispatch,
}

impl SdkMcpTool {
    /// Create a tool with an explicit input schema
    ///
    /// The handler receives the raw `arguments` object.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            dispatch: Dispatch::Raw(Arc::new(move |input| Box::pin(handler(input)))),
        }
    }

    /// Create a tool whose schema is derived from declared parameters
    ///
    /// The handler receives one value per parameter, in declaration order.
    pub fn with_params<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        params: Vec<ToolParam>,
        handler: F,
    ) -> Self
    where
        F: Fn(Vec<serde_json::Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: schema_for(&params),
            dispatch: Dispatch::Positional {
                params,
                handler: Arc::new(move |args| Box::pin(handler(args))),
            },
        }
    }

    /// Create a tool that accepts any object
    pub fn untyped<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        Self::new(name, description, serde_json::json!({"type": "object"}), handler)
    }

    /// Get the tool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the tool description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the input schema
    pub fn input_schema(&self) -> &serde_json::Value {
        &self.input_schema
    }

    /// Invoke the tool with the given `arguments` object
    pub async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolResult> {
        self.call(arguments)
            .await
            .map_err(|e| ClaudeError::mcp(e.message))
    }

    /// Invoke, keeping the JSON-RPC error classification
    pub(crate) async fn call(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, McpError> {
        let outcome = match &self.dispatch {
            Dispatch::Raw(handler) => handler(arguments).await,
            Dispatch::Positional { params, handler } => {
                let mut values = Vec::with_capacity(params.len());
                for param in params {
                    match arguments.get(&param.name) {
                        Some(value) if !value.is_null() => values.push(value.clone()),
                        _ if param.required => {
                            return Err(McpError::invalid_params(format!(
                                "Missing required argument '{}' for tool '{}'",
                                param.name, self.name
                            )))
                        }
                        _ => values.push(serde_json::Value::Null),
                    }
                }
                handler(values).await
            }
        };
        outcome.map_err(|e| McpError::internal_error(e.to_string()))
    }

    /// Entry for a `tools/list` response
    pub(crate) fn to_tool_info(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

impl std::fmt::Debug for SdkMcpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkMcpTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Result returned by a tool handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content blocks (text, images, etc.)
    pub content: Vec<ToolContent>,
    /// Tool-level failure, reported inside a successful JSON-RPC response
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// Create an error result
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: Some(true),
        }
    }
}

/// Content block in a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content
    Text {
        /// The text content
        text: String,
    },
    /// Image content (base64 encoded)
    Image {
        /// Base64 encoded image data
        data: String,
        /// MIME type (e.g., "image/png")
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_from_params() {
        let tool = SdkMcpTool::with_params(
            "greet",
            "Greet someone",
            vec![
                ToolParam::required("name", ParamKind::String).describe("Who to greet"),
                ToolParam::optional("times", ParamKind::Integer),
            ],
            |_| async { Ok(ToolResult::text("hi")) },
        );

        assert_eq!(
            tool.input_schema(),
            &json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Who to greet"},
                    "times": {"type": "integer"}
                },
                "required": ["name"]
            })
        );
    }

    #[tokio::test]
    async fn test_positional_arguments_in_declaration_order() {
        let tool = SdkMcpTool::with_params(
            "sub",
            "Subtract",
            vec![
                ToolParam::required("a", ParamKind::Number),
                ToolParam::required("b", ParamKind::Number),
                ToolParam::optional("note", ParamKind::String),
            ],
            |args| async move {
                let diff = args[0].as_f64().unwrap_or(0.0) - args[1].as_f64().unwrap_or(0.0);
                Ok(ToolResult::text(format!("{diff}:{}", args[2])))
            },
        );

        let result = tool.invoke(json!({"b": 2, "a": 5})).await.unwrap();
        assert_eq!(result, ToolResult::text("3:null"));
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let tool = SdkMcpTool::with_params(
            "echo",
            "Echo",
            vec![ToolParam::required("text", ParamKind::String)],
            |_| async { Ok(ToolResult::text("unreachable")) },
        );

        let err = tool.call(json!({})).await.unwrap_err();
        assert_eq!(err.code, McpError::INVALID_PARAMS);
        assert!(err.message.contains("text"));
    }

    #[tokio::test]
    async fn test_handler_error_is_internal() {
        let tool = SdkMcpTool::untyped("boom", "Fails", |_| async {
            Err(ClaudeError::mcp("database unreachable"))
        });

        let err = tool.call(json!({})).await.unwrap_err();
        assert_eq!(err.code, McpError::INTERNAL_ERROR);
        assert!(err.message.contains("database unreachable"));
        assert_eq!(tool.input_schema(), &json!({"type": "object"}));
    }

    #[test]
    fn test_tool_result_wire_names() {
        let value = serde_json::to_value(ToolResult::error("failed")).unwrap();
        assert_eq!(
            value,
            json!({"content": [{"type": "text", "text": "failed"}], "isError": true})
        );
        let value = serde_json::to_value(ToolResult::text("ok")).unwrap();
        assert!(value.get("isError").is_none());
    }

    #[test]
    fn test_tool_info() {
        let tool = SdkMcpTool::new(
            "test",
            "Test tool",
            json!({"type": "object"}),
            |_| async { Ok(ToolResult::text("test")) },
        );

        let info = tool.to_tool_info();
        assert_eq!(info["name"], "test");
        assert_eq!(info["description"], "Test tool");
        assert!(info["inputSchema"].is_object());
    }
}
