//! Hook registry
//!
//! Every callback configured in [`ClaudeAgentOptions::hooks`] is given an id
//! (`hook_0`, `hook_1`, ...) when the engine is built. The ids travel to the
//! CLI in the `initialize` request; the CLI does the matching and later asks
//! for a callback by id through a `hook_callback` control request.
//!
//! [`ClaudeAgentOptions::hooks`]: crate::types::ClaudeAgentOptions::hooks

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ClaudeError, Result};
use crate::types::{HookCallback, HookContext, HookEvent, HookMatcher, HookOutput};

/// Hook manager mapping callback ids to callbacks
#[derive(Clone, Default)]
pub struct HookManager {
    callbacks: HashMap<String, HookCallback>,
    config: serde_json::Map<String, serde_json::Value>,
}

impl HookManager {
    /// Create a new, empty hook manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign ids to every callback, events in a stable order
    pub fn from_hooks(hooks: &HashMap<HookEvent, Vec<HookMatcher>>) -> Self {
        let mut manager = Self::new();
        let mut events: Vec<_> = hooks.keys().copied().collect();
        events.sort();
        for event in events {
            for matcher in &hooks[&event] {
                manager.register(event, matcher);
            }
        }
        manager
    }

    /// Register one matcher's callbacks under an event
    pub fn register(&mut self, event: HookEvent, matcher: &HookMatcher) {
        let mut ids = Vec::with_capacity(matcher.hooks.len());
        for hook in &matcher.hooks {
            let id = format!("hook_{}", self.callbacks.len());
            self.callbacks.insert(id.clone(), hook.clone());
            ids.push(serde_json::Value::String(id));
        }

        let mut entry = serde_json::json!({
            "matcher": matcher.matcher,
            "hookCallbackIds": ids,
        });
        if let Some(timeout) = matcher.timeout {
            entry["timeout"] = serde_json::json!(timeout);
        }

        if let serde_json::Value::Array(list) = self
            .config
            .entry(event.as_str().to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()))
        {
            list.push(entry);
        }
    }

    /// Whether any callback is registered
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// The `hooks` field of the `initialize` request, `None` without hooks
    pub fn initialize_config(&self) -> Option<serde_json::Value> {
        (!self.config.is_empty()).then(|| serde_json::Value::Object(self.config.clone()))
    }

    /// Run the callback registered under `callback_id`
    ///
    /// # Errors
    /// `ClaudeError::Hook` for an unknown id; otherwise whatever the callback
    /// returns.
    pub async fn invoke(
        &self,
        callback_id: &str,
        input: serde_json::Value,
        tool_use_id: Option<String>,
        context: HookContext,
    ) -> Result<HookOutput> {
        let callback = self
            .callbacks
            .get(callback_id)
            .ok_or_else(|| ClaudeError::hook(format!("No hook callback found for ID: {callback_id}")))?;
        callback(input, tool_use_id, context).await
    }

    /// Create a hook callback from a closure
    pub fn callback<F, Fut>(f: F) -> HookCallback
    where
        F: Fn(serde_json::Value, Option<String>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<HookOutput>> + Send + 'static,
    {
        Arc::new(move |input, tool_use_id, context| Box::pin(f(input, tool_use_id, context)))
    }
}

/// Builder for creating hook matchers
pub struct HookMatcherBuilder {
    matcher: Option<String>,
    hooks: Vec<HookCallback>,
    timeout: Option<f64>,
}

impl HookMatcherBuilder {
    /// Create a new hook matcher builder
    ///
    /// # Arguments
    /// * `pattern` - Matcher pattern (None for all, or a tool name like `"Write|Edit"`)
    pub fn new(pattern: Option<impl Into<String>>) -> Self {
        Self {
            matcher: pattern.map(|p| p.into()),
            hooks: Vec::new(),
            timeout: None,
        }
    }

    /// Add a hook callback
    pub fn add_hook(mut self, hook: HookCallback) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Per-callback timeout in seconds, enforced by the CLI
    pub fn timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Build the hook matcher
    pub fn build(self) -> HookMatcher {
        HookMatcher {
            matcher: self.matcher,
            hooks: self.hooks,
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> HookCallback {
        HookManager::callback(|_input, _tool_use_id, _context| async { Ok(HookOutput::default()) })
    }

    #[test]
    fn test_initialize_config_shape() {
        let mut hooks = HashMap::new();
        hooks.insert(
            HookEvent::PreToolUse,
            vec![HookMatcherBuilder::new(Some("Bash"))
                .add_hook(noop())
                .add_hook(noop())
                .timeout(5.0)
                .build()],
        );
        hooks.insert(
            HookEvent::Stop,
            vec![HookMatcherBuilder::new(None::<String>).add_hook(noop()).build()],
        );

        let manager = HookManager::from_hooks(&hooks);
        let config = manager.initialize_config().unwrap();

        assert_eq!(
            config["PreToolUse"],
            json!([{"matcher": "Bash", "hookCallbackIds": ["hook_0", "hook_1"], "timeout": 5.0}])
        );
        assert_eq!(
            config["Stop"],
            json!([{"matcher": null, "hookCallbackIds": ["hook_2"]}])
        );
    }

    #[test]
    fn test_no_hooks_no_config() {
        let manager = HookManager::from_hooks(&HashMap::new());
        assert!(manager.is_empty());
        assert!(manager.initialize_config().is_none());
    }

    #[tokio::test]
    async fn test_invoke_by_id() {
        let mut manager = HookManager::new();
        let hook = HookManager::callback(|input, tool_use_id, _context| async move {
            Ok(HookOutput {
                system_message: Some(format!("{}:{}", input["n"], tool_use_id.unwrap_or_default())),
                ..Default::default()
            })
        });
        manager.register(
            HookEvent::PostToolUse,
            &HookMatcherBuilder::new(Some("*")).add_hook(hook).build(),
        );

        let output = manager
            .invoke("hook_0", json!({"n": 7}), Some("tu_1".to_string()), HookContext::default())
            .await
            .unwrap();
        assert_eq!(output.system_message.as_deref(), Some("7:tu_1"));
    }

    #[tokio::test]
    async fn test_unknown_callback_id() {
        let manager = HookManager::new();
        let result = manager
            .invoke("hook_99", json!({}), None, HookContext::default())
            .await;
        assert!(matches!(result, Err(ClaudeError::Hook(_))));
    }
}
