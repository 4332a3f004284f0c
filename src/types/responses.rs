//! Result payloads of forward calls

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::SessionEvent;
use super::identifiers::SessionId;

/// Result of `ping`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    /// Echo of the ping message
    #[serde(default)]
    pub message: Option<String>,
    /// Server timestamp (ms since epoch)
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Protocol version the server speaks
    #[serde(default)]
    pub protocol_version: Option<u32>,
}

/// Result of `status.get`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStatusResponse {
    /// CLI version string
    #[serde(default)]
    pub version: Option<String>,
    /// Protocol version
    #[serde(default)]
    pub protocol_version: Option<u32>,
}

/// Result of `auth.getStatus`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAuthStatusResponse {
    /// Whether the CLI has usable credentials
    #[serde(default)]
    pub is_authenticated: bool,
    /// How the user authenticated
    #[serde(default)]
    pub auth_type: Option<String>,
    /// GitHub host
    #[serde(default)]
    pub host: Option<String>,
    /// Login name
    #[serde(default)]
    pub login: Option<String>,
    /// Human readable status
    #[serde(default)]
    pub status_message: Option<String>,
}

/// A model offered by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model id used in session configuration
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Capability and limit description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
    /// Policy state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Value>,
    /// Billing information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing: Option<Value>,
    /// Reasoning effort levels the model accepts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_reasoning_efforts: Vec<String>,
    /// Default reasoning effort
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_reasoning_effort: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListModelsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// Metadata about a persisted session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Session id
    pub session_id: SessionId,
    /// Creation time
    #[serde(default)]
    pub start_time: Option<String>,
    /// Last modification time
    #[serde(default)]
    pub modified_time: Option<String>,
    /// Summary of the conversation
    #[serde(default)]
    pub summary: Option<String>,
    /// Whether the session lives on a remote host
    #[serde(default)]
    pub is_remote: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListSessionsResponse {
    #[serde(default)]
    pub sessions: Vec<SessionMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateSessionResponse {
    pub session_id: SessionId,
    #[serde(default)]
    pub workspace_path: Option<std::path::PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessageResponse {
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetMessagesResponse {
    #[serde(default)]
    pub events: Vec<SessionEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionIdResponse {
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// `{success, error}` shape shared by delete and set-foreground
#[derive(Debug, Deserialize)]
pub(crate) struct SuccessResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}
