//! Tool definitions and results
//!
//! Tools are registered per session. The CLI calls back with `tool.call`
//! whenever the model decides to use one.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identifiers::{SessionId, ToolName};
use crate::error::Result;

/// Context passed to a tool handler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Session the call belongs to
    pub session_id: SessionId,
    /// Correlates the result with the model's tool request
    pub tool_call_id: String,
    /// Name of the tool being invoked
    pub tool_name: ToolName,
    /// Arguments produced by the model
    #[serde(default)]
    pub arguments: Value,
}

impl ToolInvocation {
    /// Deserialize the arguments into a typed struct
    ///
    /// # Errors
    /// Returns error if the arguments do not match `T`
    pub fn arguments_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.arguments.clone())?)
    }
}

/// Binary payload attached to a tool result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolBinaryResult {
    /// Base64 data
    pub data: String,
    /// MIME type of the data
    pub mime_type: String,
    /// Payload category, e.g. "image"
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Result returned to the CLI for a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultObject {
    /// Text shown to the model
    pub text_result_for_llm: String,
    /// Binary results shown to the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binary_results_for_llm: Vec<ToolBinaryResult>,
    /// One of "success", "failure", "rejected" or "denied"
    pub result_type: String,
    /// Error detail for failed calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Text recorded in the session log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_log: Option<String>,
    /// Free-form telemetry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_telemetry: Option<Value>,
}

impl ToolResultObject {
    /// Successful result with the given text
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text_result_for_llm: text.into(),
            binary_results_for_llm: Vec::new(),
            result_type: "success".to_string(),
            error: None,
            session_log: None,
            tool_telemetry: None,
        }
    }

    /// Failed result: `text` goes to the model, `error` is diagnostic detail
    pub fn failure(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            result_type: "failure".to_string(),
            error: Some(error.into()),
            ..Self::success(text)
        }
    }

    /// Whether the call failed
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.result_type == "failure"
    }
}

impl From<String> for ToolResultObject {
    fn from(text: String) -> Self {
        Self::success(text)
    }
}

impl From<&str> for ToolResultObject {
    fn from(text: &str) -> Self {
        Self::success(text)
    }
}

impl From<Value> for ToolResultObject {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::success(s),
            other => Self::success(other.to_string()),
        }
    }
}

/// Tool handler callback type
pub type ToolHandler =
    Arc<dyn Fn(ToolInvocation) -> BoxFuture<'static, Result<ToolResultObject>> + Send + Sync>;

/// A tool exposed to the model for one session
#[derive(Clone)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: ToolName,
    /// What the tool does, shown to the model
    pub description: Option<String>,
    /// JSON schema of the arguments
    pub parameters: Option<Value>,
    /// Handler invoked on `tool.call`
    pub handler: ToolHandler,
}

impl ToolDefinition {
    /// Create a tool from a JSON schema and an async handler
    ///
    /// # Examples
    /// ```
    /// use kodegen_copilot_agent::types::ToolDefinition;
    /// use serde_json::json;
    ///
    /// let tool = ToolDefinition::new(
    ///     "echo",
    ///     "Echo the input back",
    ///     json!({"type": "object", "properties": {"text": {"type": "string"}}}),
    ///     |invocation| async move {
    ///         Ok(invocation.arguments["text"].as_str().unwrap_or_default().to_string())
    ///     },
    /// );
    /// assert_eq!(tool.name.as_str(), "echo");
    /// ```
    pub fn new<F, Fut, R>(
        name: impl Into<ToolName>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<ToolResultObject>,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.into(),
            description: Some(description.into()),
            parameters: Some(parameters),
            handler: Arc::new(move |invocation| {
                let fut = handler(invocation);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        }
    }

    /// Create a tool whose argument schema is derived from `T`
    pub fn with_schema<T, F, Fut, R>(
        name: impl Into<ToolName>,
        description: impl Into<String>,
        handler: F,
    ) -> Self
    where
        T: JsonSchema,
        F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<ToolResultObject>,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
        Self::new(name, description, schema, handler)
    }

    pub(crate) fn wire(&self) -> ToolDef {
        ToolDef {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("handler", &"<callback>")
            .finish()
    }
}

/// Wire form of a tool declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool name
    pub name: ToolName,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Argument schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}
