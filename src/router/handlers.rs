//! Per-session handler table

use std::collections::HashMap;

use crate::types::hooks::SessionHooks;
use crate::types::identifiers::ToolName;
use crate::types::permissions::PermissionHandler;
use crate::types::session_config::SessionConfig;
use crate::types::tools::ToolDefinition;
use crate::types::user_input::UserInputHandler;

/// Handlers registered for one session
///
/// At most one handler per capability; tools are keyed by name, and a later
/// tool with the same name replaces an earlier one.
#[derive(Clone, Default)]
pub struct SessionHandlers {
    /// Tools by name
    pub tools: HashMap<ToolName, ToolDefinition>,
    /// Permission decisions
    pub permission: Option<PermissionHandler>,
    /// User input prompts
    pub user_input: Option<UserInputHandler>,
    /// Lifecycle hooks
    pub hooks: SessionHooks,
}

impl SessionHandlers {
    /// Collect the handlers configured on a session
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        let tools = config
            .tools
            .iter()
            .map(|tool| (tool.name.clone(), tool.clone()))
            .collect();
        Self {
            tools,
            permission: config.on_permission_request.clone(),
            user_input: config.on_user_input_request.clone(),
            hooks: config.hooks.clone(),
        }
    }

    /// Look up a tool
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }
}

impl std::fmt::Debug for SessionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<&str> = self.tools.keys().map(ToolName::as_str).collect();
        tools.sort_unstable();
        f.debug_struct("SessionHandlers")
            .field("tools", &tools)
            .field("permission", &self.permission.as_ref().map(|_| "<callback>"))
            .field("user_input", &self.user_input.as_ref().map(|_| "<callback>"))
            .field("hooks", &self.hooks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::permissions::{PermissionRequestResult, permission_handler};
    use serde_json::json;

    #[test]
    fn collects_handlers_from_config() {
        let config = SessionConfig::builder()
            .tool(ToolDefinition::new("a", "first", json!({}), |_| async {
                Ok("one")
            }))
            .tool(ToolDefinition::new("a", "second", json!({}), |_| async {
                Ok("two")
            }))
            .on_permission_request(permission_handler(|_, _| async {
                Ok(PermissionRequestResult::approved())
            }))
            .build();

        let handlers = SessionHandlers::from_config(&config);
        assert_eq!(handlers.tools.len(), 1);
        assert_eq!(
            handlers.tool("a").and_then(|t| t.description.as_deref()),
            Some("second")
        );
        assert!(handlers.permission.is_some());
        assert!(handlers.user_input.is_none());
    }
}
