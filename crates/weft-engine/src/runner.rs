use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use weft_core::errors::ModelError;
use weft_core::events::{AgentEvent, UserEvent};
use weft_core::ids::{MessageId, ThreadId};
use weft_core::messages::{FunctionCall, FunctionResponse, Message, Role};
use weft_core::pending::find_pending_call;
use weft_core::provider::{ModelProvider, ModelRequest};
use weft_core::tools::{ToolContext, ToolResult};
use weft_store::messages::MessageRepo;
use weft_store::{Database, StoreError};

use crate::accumulate::MessageAccumulator;
use crate::dispatch::{Dispatch, Dispatcher, DEFAULT_TOOL_TIMEOUT};
use crate::error::EngineError;
use crate::next_speaker::{ContinuationOracle, NextSpeaker};
use crate::registry::ToolRegistry;

/// Upper bound on model streams per invocation. Exceeding it is a forced
/// stop with whatever state has been persisted, not an error.
pub const MAX_TURNS: u32 = 50;

const ORACLE_WINDOW: usize = 10;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the \
available tools when they help you answer, and say what you are doing as \
you work.";

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub max_turns: u32,
    /// Trailing message window handed to the continuation oracle.
    pub oracle_window: usize,
    pub system_prompt: String,
    pub tool_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_turns: MAX_TURNS,
            oracle_window: ORACLE_WINDOW,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// How a non-error invocation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Natural stop: the oracle handed the floor back, the stream ended
    /// without content, or the turn budget ran out.
    Completed,
    /// A client tool call awaits resolution. Resume by submitting a
    /// `function_response` event for it.
    Suspended,
    /// The cancellation token fired. Nothing was emitted or persisted after
    /// it was observed.
    Cancelled,
}

/// Synthesizes the response recorded for a pending call the user bypassed
/// by sending fresh text instead of resolving it.
pub trait IgnoredCallPolicy: Send + Sync {
    fn synthesize(&self, call: &FunctionCall) -> FunctionResponse;
}

/// Default policy: record a refusal so the model is never left waiting on a
/// call that will never resolve.
pub struct RefusalPolicy;

impl IgnoredCallPolicy for RefusalPolicy {
    fn synthesize(&self, call: &FunctionCall) -> FunctionResponse {
        FunctionResponse::error(
            call.id.clone(),
            &call.name,
            "Tool call was not executed: superseded by a new user message.",
        )
    }
}

/// Drives one thread's turn: admits the incoming event into persisted
/// history, then alternates between resolving pending tool calls and
/// streaming model turns until the conversation needs the user again.
///
/// At most one invocation may be active per thread; `AgentService` enforces
/// that for its callers.
pub struct AgentRunner {
    provider: Arc<dyn ModelProvider>,
    dispatcher: Dispatcher,
    oracle: ContinuationOracle,
    messages: MessageRepo,
    event_tx: broadcast::Sender<AgentEvent>,
    policy: Arc<dyn IgnoredCallPolicy>,
    config: RunnerConfig,
}

impl AgentRunner {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        db: Database,
        event_tx: broadcast::Sender<AgentEvent>,
        config: RunnerConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry).with_tool_timeout(config.tool_timeout);
        Self {
            provider: Arc::clone(&provider),
            dispatcher,
            oracle: ContinuationOracle::new(provider),
            messages: MessageRepo::new(db),
            event_tx,
            policy: Arc::new(RefusalPolicy),
            config,
        }
    }

    pub fn with_ignored_call_policy(mut self, policy: Arc<dyn IgnoredCallPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[instrument(skip_all, fields(thread_id = %event.thread_id(), event = event.event_type()))]
    pub async fn run(
        &self,
        event: UserEvent,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        let thread_id = event.thread_id().clone();
        let mut buffer = self.messages.list(&thread_id)?;

        if let Some(outcome) = self.admit(&mut buffer, event, cancel)? {
            return Ok(outcome);
        }

        self.send(AgentEvent::IsThinking {
            thread_id: thread_id.clone(),
            is_thinking: true,
        });
        let mut thinking = true;
        let mut turns_used = 0u32;

        loop {
            if turns_used >= self.config.max_turns {
                warn!(
                    max_turns = self.config.max_turns,
                    "turn budget exhausted, forcing stop"
                );
                break;
            }
            turns_used += 1;

            // Resolve every unresolved call on the tail message before the
            // next model turn.
            while let Some(pending) = find_pending_call(&buffer) {
                if cancel.is_cancelled() {
                    return Ok(RunOutcome::Cancelled);
                }

                let ctx = ToolContext {
                    thread_id: thread_id.clone(),
                    cancel: cancel.clone(),
                };
                match self.dispatcher.dispatch(&pending.call, &ctx).await {
                    Dispatch::Client => {
                        if let Some(message) = buffer.iter().find(|m| m.id == pending.message_id)
                        {
                            self.send(AgentEvent::FunctionCall {
                                thread_id: thread_id.clone(),
                                message: message.clone(),
                            });
                        }
                        info!(tool = %pending.call.name, "client tool call awaits resolution");
                        return Ok(RunOutcome::Suspended);
                    }
                    Dispatch::Server(result) => {
                        if cancel.is_cancelled() {
                            return Ok(RunOutcome::Cancelled);
                        }
                        let response = result_to_response(&pending.call, result);
                        let updated = self
                            .record_response(&mut buffer, &pending.message_id, response)
                            .map_err(|e| self.fail_store(&thread_id, e))?;
                        self.send(AgentEvent::FunctionResponse {
                            thread_id: thread_id.clone(),
                            message: updated,
                        });
                    }
                }
            }

            // One streamed model turn.
            let request = ModelRequest::new(buffer.clone(), &self.config.system_prompt)
                .with_tools(self.dispatcher.definitions());

            let mut stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                result = self.provider.stream(&request) => match result {
                    Ok(stream) => stream,
                    Err(e) => return Err(self.fail_model(&thread_id, e)),
                },
            };

            let mut acc = MessageAccumulator::new(thread_id.clone());
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                    item = stream.next() => item,
                };
                let Some(item) = item else { break };
                let fragment = match item {
                    Ok(fragment) => fragment,
                    Err(e) => return Err(self.fail_model(&thread_id, e)),
                };
                if fragment.is_empty() {
                    continue;
                }

                if thinking {
                    thinking = false;
                    self.send(AgentEvent::IsThinking {
                        thread_id: thread_id.clone(),
                        is_thinking: false,
                    });
                }
                acc.push(fragment);
                self.send(AgentEvent::Message {
                    thread_id: thread_id.clone(),
                    message: acc.snapshot(),
                });
            }
            drop(stream);

            let Some(message) = acc.finalize() else {
                debug!("model stream ended without content");
                break;
            };

            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            let row = self
                .messages
                .append(&message)
                .map_err(|e| self.fail_store(&thread_id, e))?;
            buffer.push(row.message);

            if find_pending_call(&buffer).is_some() {
                continue;
            }

            let window_start = buffer.len().saturating_sub(self.config.oracle_window);
            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                decision = self.oracle.decide(&buffer[window_start..]) => decision,
            };
            match decision {
                Ok(d) if d.next_speaker == NextSpeaker::Model => {
                    debug!(reasoning = %d.reasoning, "model keeps the floor");
                }
                Ok(_) => break,
                Err(e) => {
                    warn!(error = %e, "continuation check failed, handing back to the user");
                    break;
                }
            }
        }

        self.send(AgentEvent::IsThinking {
            thread_id: thread_id.clone(),
            is_thinking: false,
        });
        self.send(AgentEvent::Complete {
            thread_id: thread_id.clone(),
            is_complete: true,
        });
        info!(turns = turns_used, "run complete");
        Ok(RunOutcome::Completed)
    }

    /// Fold the incoming event into persisted history before the loop
    /// starts. A `function_response` resolves unresolved calls on the tail
    /// message; `text` first settles any pending call via the ignored-call
    /// policy, then appends as a new user message. Returns `Cancelled` when
    /// the token fired before a write.
    fn admit(
        &self,
        buffer: &mut Vec<Message>,
        event: UserEvent,
        cancel: &CancellationToken,
    ) -> Result<Option<RunOutcome>, EngineError> {
        match event {
            UserEvent::FunctionResponse { message } => {
                if message.role != Role::User {
                    return Err(EngineError::InvalidEvent(
                        "events must carry a user-role message".into(),
                    ));
                }
                let responses: Vec<FunctionResponse> =
                    message.function_responses().into_iter().cloned().collect();
                if responses.is_empty() {
                    return Err(EngineError::InvalidEvent(
                        "function_response event carries no functionResponse part".into(),
                    ));
                }
                if responses.len() != message.parts.len() {
                    return Err(EngineError::InvalidEvent(
                        "function_response events may only carry functionResponse parts".into(),
                    ));
                }

                if buffer.is_empty() {
                    return Err(EngineError::InvalidEvent(
                        "no pending tool call awaits a response".into(),
                    ));
                }
                let tail_index = buffer.len() - 1;
                for response in responses {
                    let tail = &buffer[tail_index];
                    let awaited = tail.function_calls().iter().any(|c| c.id == response.id)
                        && !tail.has_response_for(&response.id);
                    if !awaited {
                        return Err(EngineError::InvalidEvent(format!(
                            "no pending tool call matches response {}",
                            response.id
                        )));
                    }
                    let tail_id = tail.id.clone();
                    if cancel.is_cancelled() {
                        return Ok(Some(RunOutcome::Cancelled));
                    }
                    self.record_response(buffer, &tail_id, response)?;
                }
            }
            UserEvent::Text { message } => {
                if message.role != Role::User {
                    return Err(EngineError::InvalidEvent(
                        "events must carry a user-role message".into(),
                    ));
                }
                if message.parts.is_empty() {
                    return Err(EngineError::InvalidEvent("message has no parts".into()));
                }

                while let Some(pending) = find_pending_call(buffer) {
                    let refusal = self.policy.synthesize(&pending.call);
                    debug!(tool = %pending.call.name, "settling bypassed call");
                    if cancel.is_cancelled() {
                        return Ok(Some(RunOutcome::Cancelled));
                    }
                    self.record_response(buffer, &pending.message_id, refusal)?;
                }

                if cancel.is_cancelled() {
                    return Ok(Some(RunOutcome::Cancelled));
                }
                let row = self.messages.append(&message)?;
                buffer.push(row.message);
            }
        }
        Ok(None)
    }

    /// Persist a response into the message that issued the call and mirror
    /// the rewrite in the turn buffer.
    fn record_response(
        &self,
        buffer: &mut [Message],
        message_id: &MessageId,
        response: FunctionResponse,
    ) -> Result<Message, StoreError> {
        let updated = self.messages.merge_response(message_id, response)?;
        if let Some(slot) = buffer.iter_mut().find(|m| m.id == *message_id) {
            *slot = updated.message.clone();
        }
        Ok(updated.message)
    }

    fn fail_model(&self, thread_id: &ThreadId, error: ModelError) -> EngineError {
        error!(error = %error, kind = error.error_kind(), "model turn failed");
        self.send(AgentEvent::Error {
            thread_id: thread_id.clone(),
            error: error.to_string(),
        });
        self.send(AgentEvent::IsThinking {
            thread_id: thread_id.clone(),
            is_thinking: false,
        });
        EngineError::Model(error)
    }

    fn fail_store(&self, thread_id: &ThreadId, error: StoreError) -> EngineError {
        error!(error = %error, "persistence failed mid-turn");
        self.send(AgentEvent::Error {
            thread_id: thread_id.clone(),
            error: error.to_string(),
        });
        self.send(AgentEvent::IsThinking {
            thread_id: thread_id.clone(),
            is_thinking: false,
        });
        EngineError::Store(error)
    }

    fn send(&self, event: AgentEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("no event receivers — event dropped");
        }
    }
}

/// A tool result becomes the `functionResponse` part recorded against the
/// call.
fn result_to_response(call: &FunctionCall, result: ToolResult) -> FunctionResponse {
    match result.error {
        Some(error) => FunctionResponse::error(call.id.clone(), &call.name, error),
        None => FunctionResponse::ok(
            call.id.clone(),
            &call.name,
            result.output.unwrap_or(serde_json::Value::Null),
        ),
    }
}
