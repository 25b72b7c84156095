use crate::messages::{FunctionResponse, Message, Part};

/// Rebuild a history window so each `functionResponse` sits next to the
/// `functionCall` that produced it.
///
/// For display consumers only — the orchestrator never needs this. Walks the
/// window in order; every response part is spliced into the most recent
/// earlier message whose matching call has no response attached yet.
/// Responses with no owning call stay where they are. A donor message left
/// with zero parts is dropped. Idempotent: on already-merged input every
/// splice lookup fails (the call carries its response) and the window passes
/// through unchanged.
pub fn merge_function_responses(messages: &[Message]) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());

    for msg in messages {
        let mut kept_parts: Vec<Part> = Vec::with_capacity(msg.parts.len());
        for part in &msg.parts {
            match part {
                Part::FunctionResponse(fr) => {
                    if !splice_response(&mut merged, fr) {
                        kept_parts.push(part.clone());
                    }
                }
                other => kept_parts.push(other.clone()),
            }
        }

        if !kept_parts.is_empty() {
            let mut out = msg.clone();
            out.parts = kept_parts;
            merged.push(out);
        }
    }

    merged
}

/// Scan backward for the message holding the unresolved call matching
/// `response` and insert the response part directly after it. Returns false
/// when no such call exists (including when the call already carries a
/// response).
fn splice_response(merged: &mut [Message], response: &FunctionResponse) -> bool {
    for msg in merged.iter_mut().rev() {
        if msg.has_response_for(&response.id) {
            continue;
        }
        let call_pos = msg.parts.iter().position(|p| match p {
            Part::FunctionCall(fc) => fc.id == response.id,
            _ => false,
        });
        if let Some(pos) = call_pos {
            msg.parts.insert(pos + 1, Part::FunctionResponse(response.clone()));
            return true;
        }
    }
    false
}
