pub mod errors;
pub mod events;
pub mod ids;
pub mod merge;
pub mod messages;
pub mod pending;
pub mod provider;
pub mod stream;
pub mod tools;

pub use errors::ModelError;
pub use events::{AgentEvent, UserEvent};
pub use ids::{MessageId, ThreadId, ToolCallId};
pub use merge::merge_function_responses;
pub use messages::{FunctionCall, FunctionResponse, Message, Part, Role};
pub use pending::{find_pending_call, PendingCall};
pub use provider::{ModelProvider, ModelRequest};
pub use stream::{Fragment, FragmentCall, FragmentStream};
pub use tools::{ExecutionMode, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
