use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::ThreadId;

/// Where a tool call gets resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Executed automatically inside the loop (search, todo operations).
    Server,
    /// Requires a human-mediated response; the loop suspends until a
    /// `function_response` event arrives (confirmation dialogs).
    Client,
}

/// Context available to tools during execution.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub thread_id: ThreadId,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of a tool execution. Exactly one of `output` / `error` is set —
/// failures are data the model reacts to, never control flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            output: Some(output),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Tool declaration sent to the model alongside the conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub mode: ExecutionMode,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON schema for the arguments object. The dispatcher checks the
    /// schema's `required` keys before invoking `execute`.
    fn parameters_schema(&self) -> serde_json::Value;

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Server
    }

    /// Never invoked for client-mode tools — their resolution arrives from
    /// outside the loop.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            mode: self.execution_mode(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("cancelled")]
    Cancelled,
}
