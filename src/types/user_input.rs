//! User input requests (the `ask_user` tool)

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::identifiers::SessionId;
use crate::error::Result;

/// Question the agent wants the user to answer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputRequest {
    /// Question text
    pub question: String,
    /// Suggested answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    /// Whether an answer outside `choices` is accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_freeform: Option<bool>,
}

/// The user's answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputResponse {
    /// Answer text
    pub answer: String,
    /// Whether the answer was typed rather than picked from `choices`
    pub was_freeform: bool,
}

impl UserInputResponse {
    /// Answer chosen from the offered choices
    pub fn choice(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            was_freeform: false,
        }
    }

    /// Free-form answer
    pub fn freeform(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            was_freeform: true,
        }
    }
}

/// Context passed to a user input handler
#[derive(Debug, Clone)]
pub struct UserInputInvocation {
    /// Session the request belongs to
    pub session_id: SessionId,
}

/// User input handler callback type
pub type UserInputHandler = Arc<
    dyn Fn(UserInputRequest, UserInputInvocation) -> BoxFuture<'static, Result<UserInputResponse>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`UserInputHandler`]
pub fn user_input_handler<F, Fut>(f: F) -> UserInputHandler
where
    F: Fn(UserInputRequest, UserInputInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<UserInputResponse>> + Send + 'static,
{
    Arc::new(move |request, invocation| Box::pin(f(request, invocation)))
}
