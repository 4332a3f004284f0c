//! Permission request types

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::identifiers::SessionId;
use crate::error::Result;

/// Permission result kinds understood by the CLI
pub mod kinds {
    /// Approved
    pub const APPROVED: &str = "approved";
    /// Denied by a configured rule
    pub const DENIED_BY_RULES: &str = "denied-by-rules";
    /// Nobody could be asked
    pub const DENIED_NO_APPROVAL_RULE: &str =
        "denied-no-approval-rule-and-could-not-request-from-user";
    /// The user was asked and said no
    pub const DENIED_INTERACTIVELY: &str = "denied-interactively-by-user";
}

/// A permission request issued by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Kind of action: "shell", "write", "read", "mcp", "url", ...
    pub kind: String,
    /// Tool call that triggered the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Kind-specific fields
    #[serde(flatten)]
    pub extension: Map<String, Value>,
}

/// Decision returned for a permission request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequestResult {
    /// One of the tags in [`kinds`]
    pub kind: String,
    /// Rules to remember alongside the decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Value>>,
}

impl PermissionRequestResult {
    /// Approve the request
    #[must_use]
    pub fn approved() -> Self {
        Self {
            kind: kinds::APPROVED.to_string(),
            rules: None,
        }
    }

    /// Deny the request interactively
    #[must_use]
    pub fn denied() -> Self {
        Self {
            kind: kinds::DENIED_INTERACTIVELY.to_string(),
            rules: None,
        }
    }

    /// Outcome used when no handler is available or the handler failed
    #[must_use]
    pub fn denied_no_approval_rule() -> Self {
        Self {
            kind: kinds::DENIED_NO_APPROVAL_RULE.to_string(),
            rules: None,
        }
    }

    /// Whether the request was approved
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.kind == kinds::APPROVED
    }
}

/// Context passed to a permission handler
#[derive(Debug, Clone)]
pub struct PermissionInvocation {
    /// Session the request belongs to
    pub session_id: SessionId,
}

/// Permission handler callback type
pub type PermissionHandler = Arc<
    dyn Fn(PermissionRequest, PermissionInvocation) -> BoxFuture<'static, Result<PermissionRequestResult>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`PermissionHandler`]
///
/// # Examples
/// ```
/// use kodegen_copilot_agent::types::{permission_handler, PermissionRequestResult};
///
/// let handler = permission_handler(|request, _ctx| async move {
///     if request.kind == "read" {
///         Ok(PermissionRequestResult::approved())
///     } else {
///         Ok(PermissionRequestResult::denied())
///     }
/// });
/// # let _ = handler;
/// ```
pub fn permission_handler<F, Fut>(f: F) -> PermissionHandler
where
    F: Fn(PermissionRequest, PermissionInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PermissionRequestResult>> + Send + 'static,
{
    Arc::new(move |request, invocation| Box::pin(f(request, invocation)))
}
