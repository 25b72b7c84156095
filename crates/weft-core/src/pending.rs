use crate::ids::MessageId;
use crate::messages::{FunctionCall, Message};

/// An unresolved function call blocking the next model turn, plus the message
/// it originated from.
#[derive(Clone, Debug)]
pub struct PendingCall {
    pub message_id: MessageId,
    pub call: FunctionCall,
}

/// Inspect the tail of an ordered message sequence for an unresolved call.
///
/// Only the last message is examined for calls: the loop resolves every call
/// before issuing another model turn, so an earlier message can never hold an
/// unresolved one. With parallel calls in one message, the first unresolved
/// call in part order is returned; callers re-run the detector after
/// resolving it.
pub fn find_pending_call(messages: &[Message]) -> Option<PendingCall> {
    let last = messages.last()?;
    for call in last.function_calls() {
        let resolved = messages.iter().rev().any(|m| m.has_response_for(&call.id));
        if !resolved {
            return Some(PendingCall {
                message_id: last.id.clone(),
                call: call.clone(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ThreadId, ToolCallId};
    use crate::messages::{FunctionResponse, Part, Role};

    fn call_part(id: &ToolCallId, name: &str) -> Part {
        Part::FunctionCall(FunctionCall {
            id: id.clone(),
            name: name.into(),
            args: serde_json::json!({}),
        })
    }

    fn response_part(id: &ToolCallId, name: &str) -> Part {
        Part::FunctionResponse(FunctionResponse::ok(
            id.clone(),
            name,
            serde_json::json!({"ok": true}),
        ))
    }

    #[test]
    fn empty_history_has_no_pending_call() {
        assert!(find_pending_call(&[]).is_none());
    }

    #[test]
    fn text_only_tail_has_no_pending_call() {
        let thread_id = ThreadId::new();
        let messages = vec![
            Message::user_text(thread_id.clone(), "hi"),
            Message::model_text(thread_id, "hello"),
        ];
        assert!(find_pending_call(&messages).is_none());
    }

    #[test]
    fn unresolved_tail_call_is_detected() {
        let thread_id = ThreadId::new();
        let call_id = ToolCallId::new();
        let tail = Message::new(
            thread_id.clone(),
            Role::Model,
            vec![
                Part::Text { text: "checking".into() },
                call_part(&call_id, "document_search"),
            ],
        );
        let messages = vec![Message::user_text(thread_id, "look it up"), tail.clone()];

        let pending = find_pending_call(&messages).expect("pending call");
        assert_eq!(pending.message_id, tail.id);
        assert_eq!(pending.call.id, call_id);
        assert_eq!(pending.call.name, "document_search");
    }

    #[test]
    fn merged_response_resolves_the_call() {
        let thread_id = ThreadId::new();
        let call_id = ToolCallId::new();
        let messages = vec![Message::new(
            thread_id,
            Role::Model,
            vec![
                call_part(&call_id, "todo_list"),
                response_part(&call_id, "todo_list"),
            ],
        )];
        assert!(find_pending_call(&messages).is_none());
    }

    #[test]
    fn parallel_calls_return_first_unresolved_in_part_order() {
        let thread_id = ThreadId::new();
        let first = ToolCallId::new();
        let second = ToolCallId::new();
        let messages = vec![Message::new(
            thread_id,
            Role::Model,
            vec![call_part(&first, "a"), call_part(&second, "b")],
        )];

        let pending = find_pending_call(&messages).expect("pending call");
        assert_eq!(pending.call.id, first);
    }

    #[test]
    fn parallel_calls_skip_resolved_ones() {
        let thread_id = ThreadId::new();
        let first = ToolCallId::new();
        let second = ToolCallId::new();
        let messages = vec![Message::new(
            thread_id,
            Role::Model,
            vec![
                call_part(&first, "a"),
                response_part(&first, "a"),
                call_part(&second, "b"),
            ],
        )];

        let pending = find_pending_call(&messages).expect("pending call");
        assert_eq!(pending.call.id, second);
    }

    #[test]
    fn only_the_tail_message_is_inspected() {
        // An unresolved call buried behind a later message is not pending —
        // by invariant that state never arises, and the detector must not
        // resurface it.
        let thread_id = ThreadId::new();
        let call_id = ToolCallId::new();
        let messages = vec![
            Message::new(
                thread_id.clone(),
                Role::Model,
                vec![call_part(&call_id, "orphaned")],
            ),
            Message::user_text(thread_id, "never mind"),
        ];
        assert!(find_pending_call(&messages).is_none());
    }
}
