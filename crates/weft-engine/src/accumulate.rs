use weft_core::ids::{ThreadId, ToolCallId};
use weft_core::messages::{FunctionCall, Message, Part, Role};
use weft_core::stream::Fragment;

/// Builds one model message out of a fragment stream.
///
/// All streamed text concatenates into a single text part; each
/// function-call fragment appends a new call part, minting an id when the
/// upstream left it out. `snapshot` exposes the partial message for
/// incremental events; `finalize` yields the message once the stream ends,
/// or nothing when it ended without content.
pub struct MessageAccumulator {
    message: Message,
    text_part: Option<usize>,
}

impl MessageAccumulator {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            message: Message::new(thread_id, Role::Model, Vec::new()),
            text_part: None,
        }
    }

    pub fn push(&mut self, fragment: Fragment) {
        if let Some(text) = fragment.text {
            match self.text_part {
                Some(idx) => {
                    if let Part::Text { text: existing } = &mut self.message.parts[idx] {
                        existing.push_str(&text);
                    }
                }
                None => {
                    self.message.parts.push(Part::Text { text });
                    self.text_part = Some(self.message.parts.len() - 1);
                }
            }
        }

        if let Some(call) = fragment.function_call {
            self.message.parts.push(Part::FunctionCall(FunctionCall {
                id: call.id.unwrap_or_else(ToolCallId::new),
                name: call.name,
                args: call.args,
            }));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.message.parts.is_empty()
    }

    /// Current state of the growing message.
    pub fn snapshot(&self) -> Message {
        self.message.clone()
    }

    pub fn finalize(self) -> Option<Message> {
        if self.message.parts.is_empty() {
            None
        } else {
            Some(self.message)
        }
    }
}
