//! Minimal SSE decoding for the streaming generation endpoint.
//!
//! The endpoint emits one complete JSON document per event and never uses
//! named `event:` types, so only `data:` payloads matter here.

/// Extract `data:` payloads from a chunk of SSE text.
/// Multi-line data is joined with newlines per the SSE spec; `event:`, `id:`,
/// `retry:` and comment lines are dropped.
pub fn parse_sse_data(text: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.is_empty() {
            if !current.is_empty() {
                payloads.push(std::mem::take(&mut current));
            }
        }
    }

    if !current.is_empty() {
        payloads.push(current);
    }
    payloads
}
