use serde::{Deserialize, Serialize};

use crate::ids::ThreadId;
use crate::messages::Message;

/// Input to an orchestrator invocation.
///
/// `Text` opens or continues a conversation; `FunctionResponse` resolves a
/// client tool call the loop previously suspended on. In both cases the
/// carried message must have the user role.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserEvent {
    #[serde(rename = "text")]
    Text { message: Message },

    #[serde(rename = "function_response")]
    FunctionResponse { message: Message },
}

impl UserEvent {
    pub fn message(&self) -> &Message {
        match self {
            Self::Text { message } | Self::FunctionResponse { message } => message,
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.message().thread_id
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::FunctionResponse { .. } => "function_response",
        }
    }
}

/// Observational events emitted while a turn runs. Consumers render these;
/// nothing in here mutates persisted state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "is_thinking")]
    IsThinking {
        thread_id: ThreadId,
        is_thinking: bool,
    },

    /// Incremental snapshot of the model message being accumulated. Emitted
    /// once per consumed fragment, each snapshot superseding the last.
    #[serde(rename = "message")]
    Message {
        thread_id: ThreadId,
        message: Message,
    },

    /// A client tool call awaits human resolution; the loop has suspended.
    #[serde(rename = "function_call")]
    FunctionCall {
        thread_id: ThreadId,
        message: Message,
    },

    /// A server tool call was executed and its response persisted.
    #[serde(rename = "function_response")]
    FunctionResponse {
        thread_id: ThreadId,
        message: Message,
    },

    #[serde(rename = "error")]
    Error {
        thread_id: ThreadId,
        error: String,
    },

    #[serde(rename = "complete")]
    Complete {
        thread_id: ThreadId,
        is_complete: bool,
    },
}

impl AgentEvent {
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Self::IsThinking { thread_id, .. }
            | Self::Message { thread_id, .. }
            | Self::FunctionCall { thread_id, .. }
            | Self::FunctionResponse { thread_id, .. }
            | Self::Error { thread_id, .. }
            | Self::Complete { thread_id, .. } => thread_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IsThinking { .. } => "is_thinking",
            Self::Message { .. } => "message",
            Self::FunctionCall { .. } => "function_call",
            Self::FunctionResponse { .. } => "function_response",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}
