//! Hook-related type definitions
//!
//! This module contains the hook kinds the CLI can invoke, their typed
//! inputs and outputs, and the per-session hook set.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::identifiers::SessionId;
use crate::error::{CopilotError, Result};

// ============================================================================
// Hook Types
// ============================================================================

/// Hook kinds, named as they appear in `hooks.invoke`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    /// Before a tool is used
    PreToolUse,
    /// After a tool is used
    PostToolUse,
    /// When the user submits a prompt
    UserPromptSubmitted,
    /// When a session starts or resumes
    SessionStart,
    /// When a session ends
    SessionEnd,
}

impl HookKind {
    /// Wire name of the hook kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "preToolUse",
            Self::PostToolUse => "postToolUse",
            Self::UserPromptSubmitted => "userPromptSubmitted",
            Self::SessionStart => "sessionStart",
            Self::SessionEnd => "sessionEnd",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookKind {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preToolUse" => Ok(Self::PreToolUse),
            "postToolUse" => Ok(Self::PostToolUse),
            "userPromptSubmitted" => Ok(Self::UserPromptSubmitted),
            "sessionStart" => Ok(Self::SessionStart),
            "sessionEnd" => Ok(Self::SessionEnd),
            other => Err(CopilotError::protocol(format!("unknown hook type '{other}'"))),
        }
    }
}

/// Context passed to every hook
#[derive(Debug, Clone)]
pub struct HookInvocation {
    /// Session the hook fires for
    pub session_id: SessionId,
}

/// Input of the `preToolUse` hook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseHookInput {
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: i64,
    /// Working directory of the session
    #[serde(default)]
    pub cwd: Option<String>,
    /// Tool about to run
    pub tool_name: String,
    /// Arguments the tool will receive
    #[serde(default)]
    pub tool_args: Value,
}

/// Output of the `preToolUse` hook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseHookOutput {
    /// "allow", "deny" or "ask"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<String>,
    /// Reason shown with the decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    /// Replacement arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<Value>,
    /// Extra context for the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Hide the tool output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
}

/// Input of the `postToolUse` hook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostToolUseHookInput {
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: i64,
    /// Working directory of the session
    #[serde(default)]
    pub cwd: Option<String>,
    /// Tool that ran
    pub tool_name: String,
    /// Arguments it received
    #[serde(default)]
    pub tool_args: Value,
    /// What it returned
    #[serde(default)]
    pub tool_result: Value,
}

/// Output of the `postToolUse` hook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostToolUseHookOutput {
    /// Replacement result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_result: Option<Value>,
    /// Extra context for the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Hide the tool output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
}

/// Input of the `userPromptSubmitted` hook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPromptSubmittedHookInput {
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: i64,
    /// Working directory of the session
    #[serde(default)]
    pub cwd: Option<String>,
    /// Submitted prompt
    pub prompt: String,
}

/// Output of the `userPromptSubmitted` hook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPromptSubmittedHookOutput {
    /// Replacement prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_prompt: Option<String>,
    /// Extra context for the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Hide the prompt from output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
}

/// Input of the `sessionStart` hook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartHookInput {
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: i64,
    /// Working directory of the session
    #[serde(default)]
    pub cwd: Option<String>,
    /// "startup", "resume" or "new"
    #[serde(default)]
    pub source: Option<String>,
    /// First prompt, when known
    #[serde(default)]
    pub initial_prompt: Option<String>,
}

/// Output of the `sessionStart` hook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartHookOutput {
    /// Extra context for the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Configuration overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_config: Option<Map<String, Value>>,
}

/// Input of the `sessionEnd` hook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndHookInput {
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: i64,
    /// Working directory of the session
    #[serde(default)]
    pub cwd: Option<String>,
    /// "complete", "error", "abort", "timeout" or "user_exit"
    #[serde(default)]
    pub reason: Option<String>,
    /// Last assistant message
    #[serde(default)]
    pub final_message: Option<String>,
    /// Error message when the session failed
    #[serde(default)]
    pub error: Option<String>,
}

/// Output of the `sessionEnd` hook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndHookOutput {
    /// Hide the session end output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    /// Cleanup steps to run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_actions: Option<Vec<String>>,
    /// Summary to record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_summary: Option<String>,
}

/// Hook callback type; `Ok(None)` means "no modification requested"
pub type HookCallback<I, O> =
    Arc<dyn Fn(I, HookInvocation) -> BoxFuture<'static, Result<Option<O>>> + Send + Sync>;

fn boxed_hook<I, O, F, Fut>(f: F) -> HookCallback<I, O>
where
    F: Fn(I, HookInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<O>>> + Send + 'static,
{
    Arc::new(move |input, invocation| Box::pin(f(input, invocation)))
}

/// Hooks registered for one session; at most one callback per kind
#[derive(Clone, Default)]
pub struct SessionHooks {
    /// `preToolUse`
    pub pre_tool_use: Option<HookCallback<PreToolUseHookInput, PreToolUseHookOutput>>,
    /// `postToolUse`
    pub post_tool_use: Option<HookCallback<PostToolUseHookInput, PostToolUseHookOutput>>,
    /// `userPromptSubmitted`
    pub user_prompt_submitted:
        Option<HookCallback<UserPromptSubmittedHookInput, UserPromptSubmittedHookOutput>>,
    /// `sessionStart`
    pub session_start: Option<HookCallback<SessionStartHookInput, SessionStartHookOutput>>,
    /// `sessionEnd`
    pub session_end: Option<HookCallback<SessionEndHookInput, SessionEndHookOutput>>,
}

impl SessionHooks {
    /// Set the `preToolUse` hook
    ///
    /// # Examples
    /// ```
    /// use kodegen_copilot_agent::types::{PreToolUseHookOutput, SessionHooks};
    ///
    /// let hooks = SessionHooks::default().on_pre_tool_use(|input, _ctx| async move {
    ///     if input.tool_name == "bash" {
    ///         return Ok(Some(PreToolUseHookOutput {
    ///             permission_decision: Some("deny".into()),
    ///             ..Default::default()
    ///         }));
    ///     }
    ///     Ok(None)
    /// });
    /// assert!(!hooks.is_empty());
    /// ```
    #[must_use]
    pub fn on_pre_tool_use<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PreToolUseHookInput, HookInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<PreToolUseHookOutput>>> + Send + 'static,
    {
        self.pre_tool_use = Some(boxed_hook(f));
        self
    }

    /// Set the `postToolUse` hook
    #[must_use]
    pub fn on_post_tool_use<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PostToolUseHookInput, HookInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<PostToolUseHookOutput>>> + Send + 'static,
    {
        self.post_tool_use = Some(boxed_hook(f));
        self
    }

    /// Set the `userPromptSubmitted` hook
    #[must_use]
    pub fn on_user_prompt_submitted<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(UserPromptSubmittedHookInput, HookInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<UserPromptSubmittedHookOutput>>> + Send + 'static,
    {
        self.user_prompt_submitted = Some(boxed_hook(f));
        self
    }

    /// Set the `sessionStart` hook
    #[must_use]
    pub fn on_session_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SessionStartHookInput, HookInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<SessionStartHookOutput>>> + Send + 'static,
    {
        self.session_start = Some(boxed_hook(f));
        self
    }

    /// Set the `sessionEnd` hook
    #[must_use]
    pub fn on_session_end<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SessionEndHookInput, HookInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<SessionEndHookOutput>>> + Send + 'static,
    {
        self.session_end = Some(boxed_hook(f));
        self
    }

    /// Whether a callback is registered for `kind`
    #[must_use]
    pub fn has(&self, kind: HookKind) -> bool {
        match kind {
            HookKind::PreToolUse => self.pre_tool_use.is_some(),
            HookKind::PostToolUse => self.post_tool_use.is_some(),
            HookKind::UserPromptSubmitted => self.user_prompt_submitted.is_some(),
            HookKind::SessionStart => self.session_start.is_some(),
            HookKind::SessionEnd => self.session_end.is_some(),
        }
    }

    /// Whether no hook is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [
            HookKind::PreToolUse,
            HookKind::PostToolUse,
            HookKind::UserPromptSubmitted,
            HookKind::SessionStart,
            HookKind::SessionEnd,
        ]
        .into_iter()
        .all(|kind| !self.has(kind))
    }
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("pre_tool_use", &self.pre_tool_use.is_some())
            .field("post_tool_use", &self.post_tool_use.is_some())
            .field("user_prompt_submitted", &self.user_prompt_submitted.is_some())
            .field("session_start", &self.session_start.is_some())
            .field("session_end", &self.session_end.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_kind_parses_wire_names() {
        assert_eq!("preToolUse".parse::<HookKind>().unwrap(), HookKind::PreToolUse);
        assert_eq!(HookKind::SessionEnd.to_string(), "sessionEnd");
        assert!("onStop".parse::<HookKind>().is_err());
    }

    #[test]
    fn empty_outputs_serialize_to_empty_objects() {
        let value = serde_json::to_value(PreToolUseHookOutput::default()).unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[test]
    fn hooks_report_registered_kinds() {
        let hooks = SessionHooks::default().on_session_end(|input, _ctx| async move {
            assert!(input.reason.is_none());
            Ok(None)
        });
        assert!(hooks.has(HookKind::SessionEnd));
        assert!(!hooks.has(HookKind::PreToolUse));
        assert!(!hooks.is_empty());
        assert!(SessionHooks::default().is_empty());
    }
}
