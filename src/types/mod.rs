//! Type definitions for the Copilot agent client
//!
//! This module contains all the type definitions used throughout the client,
//! organized into logical submodules:
//!
//! - [`identifiers`] - Type-safe ID wrappers (`SessionId`, `ToolName`, `RequestId`)
//! - [`options`] - Client options and builder
//! - [`session_config`] - Session configuration and message options
//! - [`events`] - Session events, error policy and subscriber callbacks
//! - [`lifecycle`] - Client-level session lifecycle notifications
//! - [`tools`] - Tool definitions, invocations and results
//! - [`permissions`] - Permission requests and decisions
//! - [`user_input`] - User input requests and answers
//! - [`hooks`] - Typed session hooks
//! - [`responses`] - Result payloads of forward calls

pub mod events;
pub mod hooks;
pub mod identifiers;
pub mod lifecycle;
pub mod options;
pub mod permissions;
pub mod responses;
pub mod session_config;
pub mod tools;
pub mod user_input;

// Re-export commonly used types
pub use events::{
    AssistantMessageData, EventErrorHandler, EventErrorPolicy, EventHandler, SessionErrorData,
    SessionEvent, SessionEventKind, ToolRequest,
};
pub use hooks::{
    HookCallback, HookInvocation, HookKind, PostToolUseHookInput, PostToolUseHookOutput,
    PreToolUseHookInput, PreToolUseHookOutput, SessionEndHookInput, SessionEndHookOutput,
    SessionHooks, SessionStartHookInput, SessionStartHookOutput, UserPromptSubmittedHookInput,
    UserPromptSubmittedHookOutput,
};
pub use identifiers::{RequestId, SessionId, ToolName};
pub use lifecycle::{LifecycleHandler, SessionLifecycleEvent};
pub use options::{ClientOptions, ClientOptionsBuilder};
pub use permissions::{
    PermissionHandler, PermissionInvocation, PermissionRequest, PermissionRequestResult,
    permission_handler,
};
pub use responses::{
    GetAuthStatusResponse, GetStatusResponse, ModelInfo, PingResponse, SessionMetadata,
};
pub use session_config::{
    Attachment, InfiniteSessionConfig, MessageOptions, SessionCapabilities, SessionConfig, SessionConfigBuilder,
    SystemMessageConfig,
};
pub use tools::{
    ToolBinaryResult, ToolDef, ToolDefinition, ToolHandler, ToolInvocation, ToolResultObject,
};
pub use user_input::{
    UserInputHandler, UserInputInvocation, UserInputRequest, UserInputResponse,
    user_input_handler,
};
