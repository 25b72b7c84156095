use async_trait::async_trait;
use serde_json::json;

use weft_core::tools::{ExecutionMode, Tool, ToolContext, ToolError, ToolResult};

/// Declaration-only client tool: asks the human to approve an action before
/// the model takes it. The loop suspends on this call; the answer arrives
/// later as a `function_response` event, so `execute` is never reached.
pub struct ConfirmActionTool;

#[async_trait]
impl Tool for ConfirmActionTool {
    fn name(&self) -> &str {
        "confirm_action"
    }

    fn description(&self) -> &str {
        "Ask the user to confirm before a consequential action. The response carries {\"confirmed\": true|false}."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["prompt"],
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Question shown to the user"
                }
            }
        })
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Client
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed(
            "confirm_action resolves through the client, not the loop".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::ids::ThreadId;

    #[test]
    fn declares_client_mode() {
        let tool = ConfirmActionTool;
        assert_eq!(tool.execution_mode(), ExecutionMode::Client);

        let definition = tool.to_definition();
        assert_eq!(definition.name, "confirm_action");
        assert_eq!(definition.mode, ExecutionMode::Client);
        assert_eq!(definition.parameters["required"], json!(["prompt"]));
    }

    #[tokio::test]
    async fn direct_execution_refuses() {
        let tool = ConfirmActionTool;
        let ctx = ToolContext::new(ThreadId::new());
        let result = tool.execute(json!({"prompt": "sure?"}), &ctx).await;
        assert!(matches!(result, Err(ToolError::ExecutionFailed(_))));
    }
}
