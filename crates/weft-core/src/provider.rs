use async_trait::async_trait;

use crate::errors::ModelError;
use crate::messages::Message;
use crate::stream::FragmentStream;
use crate::tools::ToolDefinition;

/// Everything a provider needs for one generation call: the ordered history
/// window, the system prompt, and the tool declarations the model may call.
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub history: Vec<Message>,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
}

impl ModelRequest {
    pub fn new(history: Vec<Message>, system_prompt: impl Into<String>) -> Self {
        Self {
            history,
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Trait implemented by each model backend (Gemini in production, the mock
/// in tests).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// One streamed generation pass. The returned sequence is forward-only
    /// and not restartable; dropping it aborts the underlying call.
    async fn stream(&self, request: &ModelRequest) -> Result<FragmentStream, ModelError>;

    /// One-shot, non-streaming completion constrained to JSON output. Used
    /// for the continuation decision after a model turn.
    async fn complete_json(&self, request: &ModelRequest) -> Result<serde_json::Value, ModelError>;
}
