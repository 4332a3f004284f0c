//! Client-level session lifecycle notifications

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identifiers::SessionId;
use crate::error::Result;

/// Lifecycle event type tags sent in `session.lifecycle`
pub mod kinds {
    /// A session was created
    pub const CREATED: &str = "session.created";
    /// A session was deleted
    pub const DELETED: &str = "session.deleted";
    /// Session metadata changed
    pub const UPDATED: &str = "session.updated";
    /// A session moved to the foreground (TUI server mode)
    pub const FOREGROUND: &str = "session.foreground";
    /// A session moved to the background (TUI server mode)
    pub const BACKGROUND: &str = "session.background";
}

/// Payload of a `session.lifecycle` notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLifecycleEvent {
    /// One of the tags in [`kinds`]
    #[serde(rename = "type")]
    pub event_type: String,
    /// Session the change applies to
    pub session_id: SessionId,
    /// Optional metadata such as summary and timestamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Subscriber callback for lifecycle notifications
pub type LifecycleHandler = Arc<dyn Fn(&SessionLifecycleEvent) -> Result<()> + Send + Sync>;
