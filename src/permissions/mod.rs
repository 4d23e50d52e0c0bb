//! Permission decisions for `can_use_tool` requests
//!
//! Order of evaluation: the disallowed list denies, the allowed list allows
//! with the original input, otherwise the user callback decides. Without a
//! callback the request is denied.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{
    CanUseToolCallback, PermissionResult, PermissionResultAllow, PermissionResultDeny,
    PermissionUpdate, ToolName, ToolPermissionContext,
};

/// Message sent back when no permission callback is configured
pub const NO_CALLBACK_DENY_MESSAGE: &str = "No permission callback configured";

/// Permission manager for tool access control
#[derive(Clone, Default)]
pub struct PermissionManager {
    callback: Option<CanUseToolCallback>,
    allowed_tools: Vec<ToolName>,
    disallowed_tools: Vec<ToolName>,
}

impl PermissionManager {
    /// Create a new permission manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the permission callback
    pub fn set_callback(&mut self, callback: CanUseToolCallback) {
        self.callback = Some(callback);
    }

    /// Tools allowed without asking the callback
    pub fn set_allowed_tools(&mut self, tools: Vec<ToolName>) {
        self.allowed_tools = tools;
    }

    /// Set disallowed tools
    pub fn set_disallowed_tools(&mut self, tools: Vec<ToolName>) {
        self.disallowed_tools = tools;
    }

    /// Whether a user callback is installed
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Decide whether a tool may run
    pub async fn can_use_tool(
        &self,
        tool_name: ToolName,
        tool_input: serde_json::Value,
        context: ToolPermissionContext,
    ) -> Result<PermissionResult> {
        if self.disallowed_tools.contains(&tool_name) {
            return Ok(PermissionResult::Deny(PermissionResultDeny {
                message: format!("Tool {} is disallowed", tool_name.as_str()),
                interrupt: false,
            }));
        }

        if self.allowed_tools.contains(&tool_name) {
            return Ok(PermissionResult::Allow(PermissionResultAllow::default()));
        }

        match self.callback {
            Some(ref callback) => callback(tool_name, tool_input, context).await,
            None => Ok(PermissionResult::Deny(PermissionResultDeny {
                message: NO_CALLBACK_DENY_MESSAGE.to_string(),
                interrupt: false,
            })),
        }
    }

    /// Create a permission callback from a closure
    pub fn callback<F, Fut>(f: F) -> CanUseToolCallback
    where
        F: Fn(ToolName, serde_json::Value, ToolPermissionContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<PermissionResult>> + Send + 'static,
    {
        Arc::new(move |tool_name, tool_input, context| Box::pin(f(tool_name, tool_input, context)))
    }
}

/// Build the context handed to the callback from the raw request fields
///
/// Suggestions that do not decode are dropped.
pub fn permission_context(
    suggestions: Option<Vec<serde_json::Value>>,
    blocked_path: Option<String>,
) -> ToolPermissionContext {
    let suggestions = suggestions
        .unwrap_or_default()
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<PermissionUpdate>(raw) {
            Ok(update) => Some(update),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring undecodable permission suggestion");
                None
            }
        })
        .collect();
    ToolPermissionContext {
        suggestions,
        blocked_path,
    }
}

/// Wire form of a decision, as the `response` of a `can_use_tool` reply
///
/// An allow without rewritten input echoes the original input.
pub fn decision_payload(
    result: PermissionResult,
    original_input: serde_json::Value,
) -> serde_json::Value {
    match result {
        PermissionResult::Allow(allow) => {
            let mut payload = serde_json::json!({
                "behavior": "allow",
                "updatedInput": allow.updated_input.unwrap_or(original_input),
            });
            if let Some(updates) = allow.updated_permissions {
                payload["updatedPermissions"] = serde_json::json!(updates);
            }
            payload
        }
        PermissionResult::Deny(deny) => serde_json::json!({
            "behavior": "deny",
            "message": deny.message,
            "interrupt": deny.interrupt,
        }),
    }
}

/// Builder for permission manager
#[derive(Default)]
pub struct PermissionManagerBuilder {
    manager: PermissionManager,
}

impl PermissionManagerBuilder {
    /// Create a new permission manager builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the permission callback
    pub fn callback(mut self, callback: Option<CanUseToolCallback>) -> Self {
        self.manager.callback = callback;
        self
    }

    /// Set allowed tools
    pub fn allowed_tools(mut self, tools: Vec<ToolName>) -> Self {
        self.manager.allowed_tools = tools;
        self
    }

    /// Set disallowed tools
    pub fn disallowed_tools(mut self, tools: Vec<ToolName>) -> Self {
        self.manager.disallowed_tools = tools;
        self
    }

    /// Build the permission manager
    pub fn build(self) -> PermissionManager {
        self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PermissionBehavior, PermissionUpdateDestination};
    use serde_json::json;

    fn deny_message(result: PermissionResult) -> String {
        match result {
            PermissionResult::Deny(deny) => deny.message,
            PermissionResult::Allow(_) => panic!("Expected deny"),
        }
    }

    #[tokio::test]
    async fn test_default_is_deny() {
        let manager = PermissionManager::new();
        let result = manager
            .can_use_tool(
                ToolName::new("test_tool"),
                json!({}),
                ToolPermissionContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(deny_message(result), NO_CALLBACK_DENY_MESSAGE);
    }

    #[tokio::test]
    async fn test_disallowed_beats_callback() {
        let manager = PermissionManagerBuilder::new()
            .disallowed_tools(vec![ToolName::new("bad_tool")])
            .callback(Some(PermissionManager::callback(|_, _, _| async {
                Ok(PermissionResult::Allow(PermissionResultAllow::default()))
            })))
            .build();

        let result = manager
            .can_use_tool(ToolName::new("bad_tool"), json!({}), ToolPermissionContext::default())
            .await
            .unwrap();
        assert!(deny_message(result).contains("bad_tool"));
    }

    #[tokio::test]
    async fn test_allowed_list_skips_callback() {
        let mut manager = PermissionManager::new();
        manager.set_allowed_tools(vec![ToolName::new("good_tool")]);

        let result = manager
            .can_use_tool(ToolName::new("good_tool"), json!({}), ToolPermissionContext::default())
            .await
            .unwrap();
        assert!(matches!(result, PermissionResult::Allow(_)));

        let result = manager
            .can_use_tool(ToolName::new("other_tool"), json!({}), ToolPermissionContext::default())
            .await
            .unwrap();
        assert!(matches!(result, PermissionResult::Deny(_)));
    }

    #[tokio::test]
    async fn test_callback_rewrites_input() {
        let mut manager = PermissionManager::new();
        manager.set_callback(PermissionManager::callback(|_, input, _| async move {
            let mut input = input;
            input["safe"] = json!(true);
            Ok(PermissionResult::Allow(PermissionResultAllow {
                updated_input: Some(input),
                updated_permissions: None,
            }))
        }));

        let result = manager
            .can_use_tool(ToolName::new("Write"), json!({"path": "a"}), ToolPermissionContext::default())
            .await
            .unwrap();
        let payload = decision_payload(result, json!({"path": "a"}));
        assert_eq!(
            payload,
            json!({"behavior": "allow", "updatedInput": {"path": "a", "safe": true}})
        );
    }

    #[test]
    fn test_allow_echoes_original_input() {
        let payload = decision_payload(
            PermissionResult::Allow(PermissionResultAllow::default()),
            json!({"command": "ls"}),
        );
        assert_eq!(payload["updatedInput"], json!({"command": "ls"}));
        assert!(payload.get("updatedPermissions").is_none());
    }

    #[test]
    fn test_deny_payload() {
        let payload = decision_payload(
            PermissionResult::Deny(PermissionResultDeny {
                message: "no".to_string(),
                interrupt: true,
            }),
            json!({}),
        );
        assert_eq!(
            payload,
            json!({"behavior": "deny", "message": "no", "interrupt": true})
        );
    }

    #[test]
    fn test_permission_context_drops_bad_suggestions() {
        let context = permission_context(
            Some(vec![
                json!({"type": "addRules", "rules": [{"toolName": "Bash"}], "behavior": "allow", "destination": "session"}),
                json!({"type": "teleport"}),
            ]),
            Some("/etc".to_string()),
        );
        assert_eq!(context.suggestions.len(), 1);
        assert_eq!(context.blocked_path.as_deref(), Some("/etc"));
        match &context.suggestions[0] {
            PermissionUpdate::AddRules {
                behavior,
                destination,
                ..
            } => {
                assert_eq!(*behavior, Some(PermissionBehavior::Allow));
                assert_eq!(*destination, Some(PermissionUpdateDestination::Session));
            }
            other => panic!("Expected addRules, got {other:?}"),
        }
    }
}
