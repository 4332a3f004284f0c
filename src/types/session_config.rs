//! Session configuration and message options
//!
//! A [`SessionConfig`] mixes wire settings with local handlers. The handlers
//! are split off and registered with the callback router; only flags telling
//! the CLI which reverse calls it may issue go over the wire.

use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::hooks::SessionHooks;
use super::identifiers::SessionId;
use super::permissions::PermissionHandler;
use super::tools::{ToolDef, ToolDefinition};
use super::user_input::UserInputHandler;

bitflags! {
    /// Reverse-call capabilities a session advertises to the CLI
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SessionCapabilities: u32 {
        /// Permission requests are answered by a local handler
        const REQUEST_PERMISSION = 0b0001;
        /// User input requests are answered by a local handler
        const REQUEST_USER_INPUT = 0b0010;
        /// At least one hook is registered
        const HOOKS = 0b0100;
        /// At least one tool is registered
        const TOOLS = 0b1000;
    }
}

/// How the system message is combined with the CLI default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMessageConfig {
    /// "append" (default) or "replace"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Message text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Infinite sessions keep a persistent workspace and compact context in the
/// background as the conversation grows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfiniteSessionConfig {
    /// Turn infinite sessions on or off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Context usage ratio (0.0..=1.0) at which background compaction starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_compaction_threshold: Option<f64>,
    /// Context usage ratio at which the session blocks until compaction ends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_exhaustion_threshold: Option<f64>,
}

impl InfiniteSessionConfig {
    /// Enabled with the CLI's default thresholds
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: Some(true),
            ..Self::default()
        }
    }

    /// Disabled
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ..Self::default()
        }
    }

    /// Set both compaction thresholds
    #[must_use]
    pub const fn thresholds(mut self, background: f64, exhaustion: f64) -> Self {
        self.background_compaction_threshold = Some(background);
        self.buffer_exhaustion_threshold = Some(exhaustion);
        self
    }
}

/// Configuration for creating or resuming a session
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Caller-chosen session id
    pub session_id: Option<SessionId>,
    /// Model id
    pub model: Option<String>,
    /// "low", "medium", "high" or "xhigh"
    pub reasoning_effort: Option<String>,
    /// System message customization
    pub system_message: Option<SystemMessageConfig>,
    /// Only these built-in tools are available
    pub available_tools: Option<Vec<String>>,
    /// These built-in tools are disabled
    pub excluded_tools: Option<Vec<String>>,
    /// Bring-your-own-key provider configuration
    pub provider: Option<Value>,
    /// Working directory of the session
    pub working_directory: Option<PathBuf>,
    /// Configuration directory override
    pub config_dir: Option<PathBuf>,
    /// Emit delta events while streaming
    pub streaming: Option<bool>,
    /// MCP server configurations, keyed by name
    pub mcp_servers: Option<Map<String, Value>>,
    /// Custom agent definitions
    pub custom_agents: Option<Vec<Value>>,
    /// Resume without replaying the resume event (resume only)
    pub disable_resume: Option<bool>,
    /// Extra directories the CLI loads skills from
    pub skill_directories: Option<Vec<PathBuf>>,
    /// Skills to turn off by name
    pub disabled_skills: Option<Vec<String>>,
    /// Persistent workspace with background compaction
    pub infinite_sessions: Option<InfiniteSessionConfig>,
    /// Tools implemented by this process; names are unique
    pub tools: Vec<ToolDefinition>,
    /// Permission handler
    pub on_permission_request: Option<PermissionHandler>,
    /// User input handler
    pub on_user_input_request: Option<UserInputHandler>,
    /// Lifecycle hooks
    pub hooks: SessionHooks,
}

impl SessionConfig {
    /// Create a new builder for `SessionConfig`
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Capabilities implied by the configured handlers
    #[must_use]
    pub fn capabilities(&self) -> SessionCapabilities {
        let mut caps = SessionCapabilities::empty();
        caps.set(
            SessionCapabilities::REQUEST_PERMISSION,
            self.on_permission_request.is_some(),
        );
        caps.set(
            SessionCapabilities::REQUEST_USER_INPUT,
            self.on_user_input_request.is_some(),
        );
        caps.set(SessionCapabilities::HOOKS, !self.hooks.is_empty());
        caps.set(SessionCapabilities::TOOLS, !self.tools.is_empty());
        caps
    }

    /// Wire parameters for `session.create` / `session.resume`
    pub(crate) fn to_params(&self, session_id: Option<&SessionId>) -> crate::Result<Value> {
        let caps = self.capabilities();
        let request = SessionRequest {
            session_id: session_id.or(self.session_id.as_ref()),
            model: self.model.as_deref(),
            reasoning_effort: self.reasoning_effort.as_deref(),
            system_message: self.system_message.as_ref(),
            available_tools: self.available_tools.as_ref(),
            excluded_tools: self.excluded_tools.as_ref(),
            provider: self.provider.as_ref(),
            working_directory: self.working_directory.as_ref(),
            config_dir: self.config_dir.as_ref(),
            streaming: self.streaming,
            mcp_servers: self.mcp_servers.as_ref(),
            custom_agents: self.custom_agents.as_ref(),
            disable_resume: self.disable_resume,
            skill_directories: self.skill_directories.as_ref(),
            disabled_skills: self.disabled_skills.as_ref(),
            infinite_sessions: self.infinite_sessions.as_ref(),
            tools: self.declared_tools(),
            request_permission: caps.contains(SessionCapabilities::REQUEST_PERMISSION),
            request_user_input: caps.contains(SessionCapabilities::REQUEST_USER_INPUT),
            hooks: caps.contains(SessionCapabilities::HOOKS),
        };
        Ok(serde_json::to_value(request)?)
    }

    /// One declaration per tool name; a later definition replaces an earlier
    /// one in place
    fn declared_tools(&self) -> Vec<ToolDef> {
        let mut declared: Vec<ToolDef> = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            match declared.iter_mut().find(|def| def.name == tool.name) {
                Some(existing) => *existing = tool.wire(),
                None => declared.push(tool.wire()),
            }
        }
        declared
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("session_id", &self.session_id)
            .field("model", &self.model)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("system_message", &self.system_message)
            .field("available_tools", &self.available_tools)
            .field("excluded_tools", &self.excluded_tools)
            .field("working_directory", &self.working_directory)
            .field("streaming", &self.streaming)
            .field("infinite_sessions", &self.infinite_sessions)
            .field("tools", &self.tools)
            .field("capabilities", &self.capabilities())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_message: Option<&'a SystemMessageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_tools: Option<&'a Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    excluded_tools: Option<&'a Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_directory: Option<&'a PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_dir: Option<&'a PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    streaming: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_servers: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_agents: Option<&'a Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disable_resume: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skill_directories: Option<&'a Vec<PathBuf>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disabled_skills: Option<&'a Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    infinite_sessions: Option<&'a InfiniteSessionConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDef>,
    request_permission: bool,
    request_user_input: bool,
    hooks: bool,
}

// ============================================================================
// Builder for SessionConfig
// ============================================================================

/// Builder for `SessionConfig`
#[derive(Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Use a caller-chosen session id
    #[must_use]
    pub fn session_id(mut self, id: impl Into<SessionId>) -> Self {
        self.config.session_id = Some(id.into());
        self
    }

    /// Set the model
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    /// Set the reasoning effort
    #[must_use]
    pub fn reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.config.reasoning_effort = Some(effort.into());
        self
    }

    /// Append text to the default system message
    #[must_use]
    pub fn system_message(mut self, content: impl Into<String>) -> Self {
        self.config.system_message = Some(SystemMessageConfig {
            mode: Some("append".to_string()),
            content: Some(content.into()),
        });
        self
    }

    /// Restrict the available built-in tools
    #[must_use]
    pub fn available_tools(mut self, tools: Vec<impl Into<String>>) -> Self {
        self.config.available_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    /// Disable built-in tools
    #[must_use]
    pub fn excluded_tools(mut self, tools: Vec<impl Into<String>>) -> Self {
        self.config.excluded_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    /// Set a custom provider
    #[must_use]
    pub fn provider(mut self, provider: Value) -> Self {
        self.config.provider = Some(provider);
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.working_directory = Some(path.into());
        self
    }

    /// Override the configuration directory
    #[must_use]
    pub fn config_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_dir = Some(path.into());
        self
    }

    /// Enable or disable streaming deltas
    #[must_use]
    pub const fn streaming(mut self, streaming: bool) -> Self {
        self.config.streaming = Some(streaming);
        self
    }

    /// Add an MCP server configuration
    #[must_use]
    pub fn mcp_server(mut self, name: impl Into<String>, config: Value) -> Self {
        self.config
            .mcp_servers
            .get_or_insert_with(Map::new)
            .insert(name.into(), config);
        self
    }

    /// Add a custom agent definition
    #[must_use]
    pub fn custom_agent(mut self, agent: Value) -> Self {
        self.config
            .custom_agents
            .get_or_insert_with(Vec::new)
            .push(agent);
        self
    }

    /// Skip the resume event when resuming
    #[must_use]
    pub const fn disable_resume(mut self, disable: bool) -> Self {
        self.config.disable_resume = Some(disable);
        self
    }

    /// Load skills from an extra directory
    #[must_use]
    pub fn skill_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config
            .skill_directories
            .get_or_insert_with(Vec::new)
            .push(path.into());
        self
    }

    /// Turn off a skill by name
    #[must_use]
    pub fn disabled_skill(mut self, name: impl Into<String>) -> Self {
        self.config
            .disabled_skills
            .get_or_insert_with(Vec::new)
            .push(name.into());
        self
    }

    /// Configure infinite sessions
    #[must_use]
    pub fn infinite_sessions(mut self, config: InfiniteSessionConfig) -> Self {
        self.config.infinite_sessions = Some(config);
        self
    }

    /// Register a tool, replacing any earlier tool with the same name
    #[must_use]
    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        match self.config.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => *existing = tool,
            None => self.config.tools.push(tool),
        }
        self
    }

    /// Set the permission handler
    #[must_use]
    pub fn on_permission_request(mut self, handler: PermissionHandler) -> Self {
        self.config.on_permission_request = Some(handler);
        self
    }

    /// Set the user input handler
    #[must_use]
    pub fn on_user_input_request(mut self, handler: UserInputHandler) -> Self {
        self.config.on_user_input_request = Some(handler);
        self
    }

    /// Set the hooks
    #[must_use]
    pub fn hooks(mut self, hooks: SessionHooks) -> Self {
        self.config.hooks = hooks;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// ============================================================================
// Message options
// ============================================================================

/// File or directory attached to a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// "file" or "directory"
    #[serde(rename = "type")]
    pub kind: String,
    /// Absolute path
    pub path: PathBuf,
    /// Label shown in the UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// A user message sent to a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOptions {
    /// Prompt text
    pub prompt: String,
    /// Attached files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// "enqueue" (default) or "immediate"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl MessageOptions {
    /// Message with only a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Attach a file
    #[must_use]
    pub fn attach_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(Attachment {
            kind: "file".to_string(),
            path: path.into(),
            display_name: None,
        });
        self
    }
}

impl From<&str> for MessageOptions {
    fn from(prompt: &str) -> Self {
        Self::new(prompt)
    }
}

impl From<String> for MessageOptions {
    fn from(prompt: String) -> Self {
        Self::new(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::permissions::{PermissionRequestResult, permission_handler};

    #[test]
    fn handlers_become_capability_flags() {
        let config = SessionConfig::builder()
            .model("gpt-5")
            .on_permission_request(permission_handler(|_, _| async {
                Ok(PermissionRequestResult::approved())
            }))
            .build();

        let params = config.to_params(None).unwrap();
        assert_eq!(params["model"], "gpt-5");
        assert_eq!(params["requestPermission"], true);
        assert_eq!(params["requestUserInput"], false);
        assert_eq!(params["hooks"], false);
        assert!(params.get("tools").is_none());
        assert!(params.get("sessionId").is_none());
    }

    #[test]
    fn explicit_session_id_wins() {
        let config = SessionConfig::builder().session_id("from-config").build();
        let id = SessionId::new("explicit");
        let params = config.to_params(Some(&id)).unwrap();
        assert_eq!(params["sessionId"], "explicit");
    }

    fn named_tool(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition::new(name, description, serde_json::json!({"type": "object"}), |_| async {
            Ok(String::new())
        })
    }

    #[test]
    fn builder_replaces_tool_with_same_name() {
        let config = SessionConfig::builder()
            .tool(named_tool("a", "first"))
            .tool(named_tool("b", "other"))
            .tool(named_tool("a", "second"))
            .build();
        assert_eq!(config.tools.len(), 2);

        let params = config.to_params(None).unwrap();
        let tools = params["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "a");
        assert_eq!(tools[0]["description"], "second");
        assert_eq!(tools[1]["name"], "b");
    }

    #[test]
    fn duplicate_tools_pushed_directly_are_declared_once() {
        let mut config = SessionConfig::default();
        config.tools.push(named_tool("a", "first"));
        config.tools.push(named_tool("a", "second"));

        let params = config.to_params(None).unwrap();
        let tools = params["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["description"], "second");
    }

    #[test]
    fn skills_and_infinite_sessions_pass_through() {
        let config = SessionConfig::builder()
            .skill_directory("/opt/skills")
            .disabled_skill("deploy")
            .infinite_sessions(InfiniteSessionConfig::enabled().thresholds(0.5, 0.9))
            .build();

        let params = config.to_params(None).unwrap();
        assert_eq!(params["skillDirectories"], serde_json::json!(["/opt/skills"]));
        assert_eq!(params["disabledSkills"], serde_json::json!(["deploy"]));
        assert_eq!(
            params["infiniteSessions"],
            serde_json::json!({
                "enabled": true,
                "backgroundCompactionThreshold": 0.5,
                "bufferExhaustionThreshold": 0.9
            })
        );

        let params = SessionConfig::default().to_params(None).unwrap();
        assert!(params.get("infiniteSessions").is_none());
        assert!(params.get("skillDirectories").is_none());
    }

    #[test]
    fn message_options_serialize_prompt() {
        let value = serde_json::to_value(MessageOptions::from("hi")).unwrap();
        assert_eq!(value, serde_json::json!({"prompt": "hi"}));
    }
}
