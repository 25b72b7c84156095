use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ThreadId, ToolCallId};

/// A single entry in a thread's conversation log.
///
/// Finalized messages are immutable, with one exception: once a
/// `functionCall` resolves, its `functionResponse` part is folded in
/// directly after the call. Histories that still carry responses as
/// separate messages are reconciled by `merge` at read time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub role: Role,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Model => write!(f, "model"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "model" => Ok(Self::Model),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Part {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "functionCall")]
    FunctionCall(FunctionCall),
    #[serde(rename = "functionResponse")]
    FunctionResponse(FunctionResponse),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: ToolCallId,
    pub name: String,
    pub args: serde_json::Value,
}

/// Resolution of a function call. Exactly one of `response` / `error` is set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: ToolCallId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// --- Convenience constructors ---

impl Message {
    pub fn new(thread_id: ThreadId, role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: MessageId::new(),
            thread_id,
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    pub fn user_text(thread_id: ThreadId, text: impl Into<String>) -> Self {
        Self::new(thread_id, Role::User, vec![Part::Text { text: text.into() }])
    }

    pub fn model_text(thread_id: ThreadId, text: impl Into<String>) -> Self {
        Self::new(thread_id, Role::Model, vec![Part::Text { text: text.into() }])
    }

    pub fn user_response(thread_id: ThreadId, response: FunctionResponse) -> Self {
        Self::new(thread_id, Role::User, vec![Part::FunctionResponse(response)])
    }
}

impl FunctionResponse {
    pub fn ok(id: ToolCallId, name: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            id,
            name: name.into(),
            response: Some(response),
            error: None,
        }
    }

    pub fn error(id: ToolCallId, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            response: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// --- Accessors ---

impl Message {
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall(fc) => Some(fc),
                _ => None,
            })
            .collect()
    }

    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionResponse(fr) => Some(fr),
                _ => None,
            })
            .collect()
    }

    pub fn has_function_call(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::FunctionCall(_)))
    }

    pub fn has_response_for(&self, call_id: &ToolCallId) -> bool {
        self.parts.iter().any(|p| match p {
            Part::FunctionResponse(fr) => &fr.id == call_id,
            _ => false,
        })
    }

    /// Concatenated text content across all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_message() {
        let msg = Message::user_text(ThreadId::new(), "hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["parts"][0]["type"], "text");
        assert_eq!(json["parts"][0]["text"], "hello");
    }

    #[test]
    fn model_text_message() {
        let msg = Message::model_text(ThreadId::new(), "world");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "model");
        assert_eq!(json["parts"][0]["text"], "world");
    }

    #[test]
    fn function_call_part_uses_camel_case_tag() {
        let part = Part::FunctionCall(FunctionCall {
            id: ToolCallId::new(),
            name: "todo_list".into(),
            args: serde_json::json!({"action": "lists"}),
        });
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "functionCall");
        assert_eq!(json["name"], "todo_list");
    }

    #[test]
    fn function_response_serializes_exactly_one_side() {
        let ok = FunctionResponse::ok(ToolCallId::new(), "search", serde_json::json!({"hits": 3}));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["response"]["hits"], 3);
        assert!(json.get("error").is_none());

        let err = FunctionResponse::error(ToolCallId::new(), "search", "no index");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "no index");
        assert!(json.get("response").is_none());
        assert!(err.is_error());
    }

    #[test]
    fn function_calls_extracted_in_order() {
        let a = FunctionCall {
            id: ToolCallId::new(),
            name: "first".into(),
            args: serde_json::json!({}),
        };
        let b = FunctionCall {
            id: ToolCallId::new(),
            name: "second".into(),
            args: serde_json::json!({}),
        };
        let msg = Message::new(
            ThreadId::new(),
            Role::Model,
            vec![
                Part::Text { text: "working on it".into() },
                Part::FunctionCall(a),
                Part::FunctionCall(b),
            ],
        );
        assert!(msg.has_function_call());
        let calls = msg.function_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
        assert_eq!(msg.text(), "working on it");
    }

    #[test]
    fn has_response_for_matches_by_call_id() {
        let call_id = ToolCallId::new();
        let msg = Message::new(
            ThreadId::new(),
            Role::Model,
            vec![
                Part::FunctionCall(FunctionCall {
                    id: call_id.clone(),
                    name: "confirm_action".into(),
                    args: serde_json::json!({}),
                }),
                Part::FunctionResponse(FunctionResponse::ok(
                    call_id.clone(),
                    "confirm_action",
                    serde_json::json!({"confirmed": true}),
                )),
            ],
        );
        assert!(msg.has_response_for(&call_id));
        assert!(!msg.has_response_for(&ToolCallId::new()));
    }

    #[test]
    fn serde_roundtrip_all_parts() {
        let thread_id = ThreadId::new();
        let call_id = ToolCallId::new();
        let messages = vec![
            Message::user_text(thread_id.clone(), "hi"),
            Message::model_text(thread_id.clone(), "hello"),
            Message::new(
                thread_id.clone(),
                Role::Model,
                vec![
                    Part::Text { text: "let me check".into() },
                    Part::FunctionCall(FunctionCall {
                        id: call_id.clone(),
                        name: "document_search".into(),
                        args: serde_json::json!({"query": "release notes"}),
                    }),
                    Part::FunctionResponse(FunctionResponse::error(
                        call_id,
                        "document_search",
                        "docs root not configured",
                    )),
                ],
            ),
        ];

        for msg in &messages {
            let json = serde_json::to_string(msg).unwrap();
            let parsed: Message = serde_json::from_str(&json).unwrap();
            let json2 = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, json2, "roundtrip failed for {json}");
        }
    }

    #[test]
    fn role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
        assert_eq!(serde_json::to_string(&Role::Model).unwrap(), r#""model""#);
    }

    #[test]
    fn role_display_fromstr_roundtrip() {
        for role in [Role::User, Role::Model] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(role, parsed);
        }
        assert!("assistant".parse::<Role>().is_err());
    }
}
