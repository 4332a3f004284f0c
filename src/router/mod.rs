//! Callback router for reverse calls issued by the CLI
//!
//! The CLI calls back into the client for tool execution (`tool.call`),
//! permission decisions (`permission.request`), user prompts
//! (`userInput.request`) and hooks (`hooks.invoke`). Each call is looked up by
//! session id and capability, run on its own task, and answered with the
//! original request id.
//!
//! Handler failures never reach the transport as protocol errors. Each
//! capability turns them into a result the CLI can act on:
//!
//! | Method | No handler | Handler failed |
//! |---|---|---|
//! | `tool.call` | failure result | failure result |
//! | `permission.request` | denied, could not ask | denied, could not ask |
//! | `userInput.request` | `-32603` | `-32603` |
//! | `hooks.invoke` | `output: null` | `output: null` |

mod handlers;

pub use handlers::SessionHandlers;

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{CopilotError, Result};
use crate::rpc::messages::{JsonRpcError, error_codes};
use crate::types::hooks::{HookCallback, HookInvocation, HookKind};
use crate::types::identifiers::SessionId;
use crate::types::permissions::{
    PermissionInvocation, PermissionRequest, PermissionRequestResult,
};
use crate::types::tools::{ToolInvocation, ToolResultObject};
use crate::types::user_input::{UserInputInvocation, UserInputRequest};

/// Reverse-call method names
pub mod methods {
    /// Execute a client-side tool
    pub const TOOL_CALL: &str = "tool.call";
    /// Ask for permission to perform an action
    pub const PERMISSION_REQUEST: &str = "permission.request";
    /// Ask the user a question
    pub const USER_INPUT_REQUEST: &str = "userInput.request";
    /// Invoke a session hook
    pub const HOOKS_INVOKE: &str = "hooks.invoke";
}

const TOOL_ERROR_TEXT: &str =
    "Invoking this tool produced an error. Detailed information is not available.";

/// Routes reverse calls to the handlers registered per session
#[derive(Default)]
pub struct CallbackRouter {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandlers>>>,
}

impl CallbackRouter {
    /// Create an empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register handlers for a session, replacing any previous registration
    pub fn register(&self, session_id: SessionId, handlers: SessionHandlers) {
        log::debug!("Registering handlers for session {session_id}: {handlers:?}");
        self.sessions.write().insert(session_id, Arc::new(handlers));
    }

    /// Remove a session's handlers
    pub fn unregister(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    /// Remove every session
    pub fn clear(&self) {
        self.sessions.write().clear();
    }

    /// Whether handlers are registered for a session
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Handlers of a session
    #[must_use]
    pub fn handlers(&self, session_id: &str) -> Option<Arc<SessionHandlers>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Answer one reverse call
    ///
    /// The `Err` side is the error object to send back; it is only used for
    /// malformed calls and capabilities whose contract is an error.
    pub async fn handle(&self, method: &str, params: Value) -> std::result::Result<Value, JsonRpcError> {
        match method {
            methods::TOOL_CALL => self.handle_tool_call(params).await,
            methods::PERMISSION_REQUEST => Ok(self.handle_permission_request(params).await),
            methods::USER_INPUT_REQUEST => self.handle_user_input_request(params).await,
            methods::HOOKS_INVOKE => self.handle_hooks_invoke(params).await,
            other => Err(JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }

    fn session_handlers(
        &self,
        params: &Value,
    ) -> std::result::Result<(SessionId, Arc<SessionHandlers>), JsonRpcError> {
        let session_id = session_id_of(params)?;
        match self.handlers(session_id.as_str()) {
            Some(handlers) => Ok((session_id, handlers)),
            None => Err(JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unknown session {session_id}"),
            )),
        }
    }

    // ========================================================================
    // tool.call
    // ========================================================================

    async fn handle_tool_call(&self, params: Value) -> std::result::Result<Value, JsonRpcError> {
        let (_, handlers) = self.session_handlers(&params)?;
        let invocation: ToolInvocation = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::new(error_codes::INVALID_PARAMS, e.to_string()))?;

        let Some(tool) = handlers.tool(invocation.tool_name.as_str()) else {
            let name = invocation.tool_name;
            log::warn!("Tool '{name}' is not registered for session {}", invocation.session_id);
            let result = ToolResultObject::failure(
                format!("Tool '{name}' is not supported."),
                format!("tool '{name}' not supported"),
            );
            return Ok(json!({ "result": result }));
        };

        let name = invocation.tool_name.clone();
        let call_id = invocation.tool_call_id.clone();
        let result = match guarded((tool.handler)(invocation)).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Tool '{name}' ({call_id}) failed: {e}");
                ToolResultObject::failure(TOOL_ERROR_TEXT, e.to_string())
            }
        };
        Ok(json!({ "result": result }))
    }

    // ========================================================================
    // permission.request
    // ========================================================================

    async fn handle_permission_request(&self, params: Value) -> Value {
        let result = match self.decide_permission(params).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Permission request denied: {e}");
                PermissionRequestResult::denied_no_approval_rule()
            }
        };
        json!({ "result": result })
    }

    async fn decide_permission(&self, mut params: Value) -> Result<PermissionRequestResult> {
        let session_id = session_id_of(&params).map_err(|e| CopilotError::protocol(e.message))?;
        let handler = self
            .handlers(session_id.as_str())
            .ok_or_else(|| CopilotError::session_not_found(session_id.as_str()))?
            .permission
            .clone()
            .ok_or_else(|| CopilotError::handler("no permission handler registered"))?;

        let request: PermissionRequest = serde_json::from_value(
            params
                .get_mut("permissionRequest")
                .map(Value::take)
                .unwrap_or(Value::Null),
        )?;
        guarded(handler(request, PermissionInvocation { session_id })).await
    }

    // ========================================================================
    // userInput.request
    // ========================================================================

    async fn handle_user_input_request(
        &self,
        params: Value,
    ) -> std::result::Result<Value, JsonRpcError> {
        let (session_id, handlers) = self.session_handlers(&params)?;
        let internal = |e: CopilotError| {
            log::warn!("User input request for session {session_id} failed: {e}");
            JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                format!("User input handler error: {e}"),
            )
        };

        let Some(handler) = handlers.user_input.clone() else {
            return Err(internal(CopilotError::handler(
                "no user input handler registered",
            )));
        };
        let request: UserInputRequest = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::new(error_codes::INVALID_PARAMS, e.to_string()))?;

        let invocation = UserInputInvocation {
            session_id: session_id.clone(),
        };
        let response = guarded(handler(request, invocation))
            .await
            .map_err(internal)?;
        serde_json::to_value(response).map_err(|e| internal(e.into()))
    }

    // ========================================================================
    // hooks.invoke
    // ========================================================================

    async fn handle_hooks_invoke(&self, params: Value) -> std::result::Result<Value, JsonRpcError> {
        let (session_id, handlers) = self.session_handlers(&params)?;
        let output = match self.run_hook(&session_id, &handlers, params).await {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Hook for session {session_id} failed: {e}");
                Value::Null
            }
        };
        Ok(json!({ "output": output }))
    }

    async fn run_hook(
        &self,
        session_id: &SessionId,
        handlers: &SessionHandlers,
        mut params: Value,
    ) -> Result<Value> {
        let kind: HookKind = params
            .get("hookType")
            .and_then(Value::as_str)
            .ok_or_else(|| CopilotError::protocol("hooks.invoke without hookType"))?
            .parse()?;
        let input = params
            .get_mut("input")
            .map(Value::take)
            .unwrap_or_else(|| json!({}));
        let invocation = HookInvocation {
            session_id: session_id.clone(),
        };

        let hooks = &handlers.hooks;
        match kind {
            HookKind::PreToolUse => invoke_hook(hooks.pre_tool_use.as_ref(), input, invocation).await,
            HookKind::PostToolUse => {
                invoke_hook(hooks.post_tool_use.as_ref(), input, invocation).await
            }
            HookKind::UserPromptSubmitted => {
                invoke_hook(hooks.user_prompt_submitted.as_ref(), input, invocation).await
            }
            HookKind::SessionStart => {
                invoke_hook(hooks.session_start.as_ref(), input, invocation).await
            }
            HookKind::SessionEnd => invoke_hook(hooks.session_end.as_ref(), input, invocation).await,
        }
    }
}

impl std::fmt::Debug for CallbackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRouter")
            .field("sessions", &self.sessions.read().len())
            .finish()
    }
}

/// Run a typed hook; an absent hook or `None` output means no modification
async fn invoke_hook<I, O>(
    callback: Option<&HookCallback<I, O>>,
    input: Value,
    invocation: HookInvocation,
) -> Result<Value>
where
    I: DeserializeOwned,
    O: Serialize,
{
    let Some(callback) = callback else {
        return Ok(Value::Null);
    };
    let input: I = serde_json::from_value(input)?;
    match guarded(callback(input, invocation)).await? {
        Some(output) => Ok(serde_json::to_value(output)?),
        None => Ok(Value::Null),
    }
}

/// Await a handler future, turning a panic into a handler error
async fn guarded<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(CopilotError::from_panic(panic.as_ref())),
    }
}

fn session_id_of(params: &Value) -> std::result::Result<SessionId, JsonRpcError> {
    params
        .get("sessionId")
        .and_then(Value::as_str)
        .map(SessionId::from)
        .ok_or_else(|| JsonRpcError::new(error_codes::INVALID_PARAMS, "Missing sessionId"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hooks::{PreToolUseHookOutput, SessionHooks};
    use crate::types::permissions::{kinds, permission_handler};
    use crate::types::session_config::SessionConfig;
    use crate::types::tools::ToolDefinition;
    use crate::types::user_input::{UserInputResponse, user_input_handler};

    fn router_with(config: &SessionConfig) -> CallbackRouter {
        let router = CallbackRouter::new();
        router.register(SessionId::new("s1"), SessionHandlers::from_config(config));
        router
    }

    #[tokio::test]
    async fn tool_call_runs_handler() {
        let config = SessionConfig::builder()
            .tool(ToolDefinition::new("echo", "echo", json!({}), |inv| async move {
                Ok(inv.arguments["text"].as_str().unwrap_or_default().to_uppercase())
            }))
            .build();
        let router = router_with(&config);

        let value = router
            .handle(
                methods::TOOL_CALL,
                json!({"sessionId":"s1","toolCallId":"c1","toolName":"echo","arguments":{"text":"hi"}}),
            )
            .await
            .unwrap();
        assert_eq!(value["result"]["textResultForLlm"], "HI");
        assert_eq!(value["result"]["resultType"], "success");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_result() {
        let router = router_with(&SessionConfig::default());
        let value = router
            .handle(
                methods::TOOL_CALL,
                json!({"sessionId":"s1","toolCallId":"c1","toolName":"nope","arguments":{}}),
            )
            .await
            .unwrap();
        assert_eq!(value["result"]["resultType"], "failure");
        assert_eq!(value["result"]["textResultForLlm"], "Tool 'nope' is not supported.");
    }

    #[tokio::test]
    async fn panicking_tool_is_a_failure_result() {
        let config = SessionConfig::builder()
            .tool(ToolDefinition::new("boom", "boom", json!({}), |_| async {
                if true {
                    panic!("kaboom");
                }
                Ok("unreachable")
            }))
            .build();
        let router = router_with(&config);
        let value = router
            .handle(
                methods::TOOL_CALL,
                json!({"sessionId":"s1","toolCallId":"c1","toolName":"boom"}),
            )
            .await
            .unwrap();
        assert_eq!(value["result"]["resultType"], "failure");
        assert!(value["result"]["error"].as_str().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn permission_defaults_to_denied() {
        let router = router_with(&SessionConfig::default());
        let value = router
            .handle(
                methods::PERMISSION_REQUEST,
                json!({"sessionId":"s1","permissionRequest":{"kind":"shell"}}),
            )
            .await
            .unwrap();
        assert_eq!(value["result"]["kind"], kinds::DENIED_NO_APPROVAL_RULE);
    }

    #[tokio::test]
    async fn permission_handler_decides() {
        let config = SessionConfig::builder()
            .on_permission_request(permission_handler(|request, ctx| async move {
                assert_eq!(ctx.session_id.as_str(), "s1");
                if request.kind == "read" {
                    Ok(PermissionRequestResult::approved())
                } else {
                    Ok(PermissionRequestResult::denied())
                }
            }))
            .build();
        let router = router_with(&config);
        let value = router
            .handle(
                methods::PERMISSION_REQUEST,
                json!({"sessionId":"s1","permissionRequest":{"kind":"read","path":"/tmp"}}),
            )
            .await
            .unwrap();
        assert_eq!(value["result"]["kind"], kinds::APPROVED);
    }

    #[tokio::test]
    async fn user_input_without_handler_is_internal_error() {
        let router = router_with(&SessionConfig::default());
        let err = router
            .handle(
                methods::USER_INPUT_REQUEST,
                json!({"sessionId":"s1","question":"continue?"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, error_codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn user_input_handler_answers() {
        let config = SessionConfig::builder()
            .on_user_input_request(user_input_handler(|request, _| async move {
                Ok(UserInputResponse::choice(
                    request.choices.unwrap_or_default().remove(0),
                ))
            }))
            .build();
        let router = router_with(&config);
        let value = router
            .handle(
                methods::USER_INPUT_REQUEST,
                json!({"sessionId":"s1","question":"pick","choices":["a","b"]}),
            )
            .await
            .unwrap();
        assert_eq!(value, json!({"answer":"a","wasFreeform":false}));
    }

    #[tokio::test]
    async fn hooks_run_typed_callbacks() {
        let hooks = SessionHooks::default().on_pre_tool_use(|input, _| async move {
            Ok((input.tool_name == "bash").then(|| PreToolUseHookOutput {
                permission_decision: Some("deny".into()),
                ..Default::default()
            }))
        });
        let router = router_with(&SessionConfig::builder().hooks(hooks).build());

        let denied = router
            .handle(
                methods::HOOKS_INVOKE,
                json!({"sessionId":"s1","hookType":"preToolUse",
                       "input":{"timestamp":1,"toolName":"bash","toolArgs":{}}}),
            )
            .await
            .unwrap();
        assert_eq!(denied["output"]["permissionDecision"], "deny");

        let untouched = router
            .handle(
                methods::HOOKS_INVOKE,
                json!({"sessionId":"s1","hookType":"sessionEnd","input":{"timestamp":1}}),
            )
            .await
            .unwrap();
        assert_eq!(untouched, json!({"output": null}));
    }

    #[tokio::test]
    async fn unknown_session_and_method() {
        let router = CallbackRouter::new();
        let err = router
            .handle(methods::HOOKS_INVOKE, json!({"sessionId":"zzz","hookType":"preToolUse"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);

        let err = router.handle("sampling.create", json!({})).await.unwrap_err();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn unregister_removes_session() {
        let router = router_with(&SessionConfig::default());
        assert!(router.contains("s1"));
        assert!(router.unregister("s1"));
        assert!(!router.unregister("s1"));
    }
}
