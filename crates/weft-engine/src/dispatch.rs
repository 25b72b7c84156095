use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, instrument, warn};

use weft_core::messages::FunctionCall;
use weft_core::tools::{ExecutionMode, ToolContext, ToolDefinition, ToolResult};

use crate::registry::ToolRegistry;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of routing one function call.
#[derive(Debug)]
pub enum Dispatch {
    /// Executed inside the loop; the result is ready to record against the
    /// call.
    Server(ToolResult),
    /// Needs a human-mediated response; the loop must suspend.
    Client,
}

/// Routes function calls to registered tools and absorbs every way an
/// execution can fail. Unknown names, bad arguments, handler errors, panics,
/// and timeouts all come back as error-shaped results for the model to react
/// to; nothing escapes this boundary as an `Err`.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    tool_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Declarations for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    #[instrument(skip(self, call, ctx), fields(tool = %call.name, call_id = %call.id))]
    pub async fn dispatch(&self, call: &FunctionCall, ctx: &ToolContext) -> Dispatch {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, "model called an unregistered tool");
            return Dispatch::Server(ToolResult::error(format!("Unknown tool: {}", call.name)));
        };

        if tool.execution_mode() == ExecutionMode::Client {
            return Dispatch::Client;
        }

        if let Some(problem) = check_required_args(&tool.parameters_schema(), &call.args) {
            return Dispatch::Server(ToolResult::error(format!(
                "Invalid arguments for {}: {problem}",
                call.name
            )));
        }

        let result = tokio::time::timeout(
            self.tool_timeout,
            std::panic::AssertUnwindSafe(tool.execute(call.args.clone(), ctx)).catch_unwind(),
        )
        .await;

        let tool_result = match result {
            Ok(Ok(Ok(r))) => r,
            Ok(Ok(Err(e))) => ToolResult::error(e.to_string()),
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                error!(tool = %call.name, panic = %msg, "tool panicked during execution");
                ToolResult::error("Internal error: tool crashed")
            }
            Err(_) => {
                warn!(
                    tool = %call.name,
                    timeout_secs = self.tool_timeout.as_secs(),
                    "tool timed out"
                );
                ToolResult::error(format!(
                    "Tool timed out after {}s",
                    self.tool_timeout.as_secs()
                ))
            }
        };

        Dispatch::Server(tool_result)
    }
}

/// Check the schema's `required` keys against the call's arguments object.
/// Returns a description of the first problem, or None when the call is
/// well-formed enough to hand to the tool.
fn check_required_args(schema: &serde_json::Value, args: &serde_json::Value) -> Option<String> {
    let required = schema.get("required").and_then(|r| r.as_array())?;
    if required.is_empty() {
        return None;
    }
    let Some(obj) = args.as_object() else {
        return Some("arguments must be a JSON object".into());
    };
    for key in required.iter().filter_map(|k| k.as_str()) {
        if !obj.contains_key(key) {
            return Some(format!("missing required argument '{key}'"));
        }
    }
    None
}

#[allow(clippy::borrowed_box)]
fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
