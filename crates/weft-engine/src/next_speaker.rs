use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use weft_core::errors::ModelError;
use weft_core::messages::Message;
use weft_core::provider::{ModelProvider, ModelRequest};

/// Who produces the next message in the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextSpeaker {
    User,
    Model,
}

/// Parsed continuation decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NextSpeakerDecision {
    pub reasoning: String,
    pub next_speaker: NextSpeaker,
}

const ORACLE_SYSTEM_PROMPT: &str = "You review a conversation between a user \
and an assistant and decide who should produce the next message. Respond \
only with the requested JSON object.";

const ORACLE_INSTRUCTION: &str = r#"Decide who should speak next. Apply these rules in order:
1. If the assistant's last message declares an imminent next action it has not yet taken, or leaves a multi-step task incomplete, answer "model".
2. If the assistant's last message ends with a direct question to the user, answer "user".
3. If a tool was just invoked and resolved, answer "model" so the assistant can react to the result.
4. Otherwise answer "user".

Respond with JSON: {"reasoning": "<one sentence>", "next_speaker": "user" | "model"}"#;

/// Decides whether the loop keeps streaming model turns or hands the floor
/// back to the user. One non-streaming JSON call over a trailing message
/// window; consulted only after a model turn that left no call pending.
pub struct ContinuationOracle {
    provider: Arc<dyn ModelProvider>,
}

impl ContinuationOracle {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// The caller slices the window; decisions are a black box — whatever
    /// comes back is followed without second-guessing.
    #[instrument(skip(self, window), fields(window = window.len()))]
    pub async fn decide(&self, window: &[Message]) -> Result<NextSpeakerDecision, ModelError> {
        let Some(last) = window.last() else {
            return Ok(NextSpeakerDecision {
                reasoning: "nothing has been said yet".into(),
                next_speaker: NextSpeaker::User,
            });
        };

        let mut history = window.to_vec();
        history.push(Message::user_text(last.thread_id.clone(), ORACLE_INSTRUCTION));
        let request = ModelRequest::new(history, ORACLE_SYSTEM_PROMPT);

        let value = self.provider.complete_json(&request).await?;
        let decision: NextSpeakerDecision = serde_json::from_value(value)
            .map_err(|e| ModelError::Decode(format!("next_speaker decision: {e}")))?;

        debug!(
            next_speaker = ?decision.next_speaker,
            reasoning = %decision.reasoning,
            "continuation decision"
        );
        Ok(decision)
    }
}
