//! Request and response shapes for the generative language API.

use serde::Deserialize;
use serde_json::{json, Value};

use weft_core::messages::{FunctionResponse, Message, Part, Role};
use weft_core::provider::ModelRequest;
use weft_core::stream::Fragment;
use weft_core::tools::ToolDefinition;

/// Build the JSON body for a generation call.
pub fn build_request_body(request: &ModelRequest) -> Value {
    let mut body = json!({
        "contents": build_contents(&request.history),
    });

    if !request.system_prompt.is_empty() {
        body["systemInstruction"] = json!({
            "parts": [{"text": request.system_prompt}],
        });
    }

    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request.tools.iter().map(build_declaration).collect();
        body["tools"] = json!([{"functionDeclarations": declarations}]);
    }

    body
}

/// Build the body for a non-streaming call constrained to JSON output.
pub fn build_json_request_body(request: &ModelRequest) -> Value {
    let mut body = build_request_body(request);
    body["generationConfig"] = json!({"responseMimeType": "application/json"});
    body
}

fn build_declaration(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters,
    })
}

/// Convert history into wire contents. Function responses always travel in a
/// user-role content regardless of which message they were folded into, so a
/// merged model message can fan out into several contents.
fn build_contents(history: &[Message]) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::new();

    for message in history {
        for part in &message.parts {
            let (role, wire_part) = match part {
                Part::Text { text } => (wire_role(message.role), json!({"text": text})),
                Part::FunctionCall(fc) => (
                    "model",
                    json!({"functionCall": {"name": fc.name, "args": fc.args}}),
                ),
                Part::FunctionResponse(fr) => (
                    "user",
                    json!({"functionResponse": {"name": fr.name, "response": response_payload(fr)}}),
                ),
            };
            push_part(&mut contents, role, wire_part);
        }
    }

    contents
}

/// Append a part to the previous content when the role matches, otherwise
/// open a new content.
fn push_part(contents: &mut Vec<Value>, role: &str, part: Value) {
    if let Some(last) = contents.last_mut() {
        if last["role"] == role {
            if let Some(parts) = last["parts"].as_array_mut() {
                parts.push(part);
                return;
            }
        }
    }
    contents.push(json!({"role": role, "parts": [part]}));
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

fn response_payload(fr: &FunctionResponse) -> Value {
    match (&fr.response, &fr.error) {
        (Some(value), _) => value.clone(),
        (None, Some(error)) => json!({"error": error}),
        (None, None) => json!({}),
    }
}

// --- Response parsing ---

/// Typed view of one streamed chunk or unary response.
#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePart {
    pub text: Option<String>,
    pub function_call: Option<WireFunctionCall>,
}

#[derive(Debug, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Fragments carried by the first candidate of a response chunk.
pub fn fragments(response: &GenerateContentResponse) -> Vec<Fragment> {
    let mut out = Vec::new();
    let Some(candidate) = response.candidates.first() else {
        return out;
    };
    let Some(content) = &candidate.content else {
        return out;
    };

    for part in &content.parts {
        if let Some(text) = &part.text {
            if !text.is_empty() {
                out.push(Fragment::text(text.clone()));
            }
        }
        if let Some(call) = &part.function_call {
            out.push(Fragment::call(call.name.clone(), call.args.clone()));
        }
    }
    out
}

/// Concatenated text of the first candidate. JSON-mode responses put the
/// whole document here.
pub fn first_candidate_text(response: &GenerateContentResponse) -> Option<String> {
    let candidate = response.candidates.first()?;
    let content = candidate.content.as_ref()?;
    let text: String = content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Pull the human-readable message out of an error body, falling back to the
/// raw body when it is not the documented shape.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string())
}
