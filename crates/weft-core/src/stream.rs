use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;
use crate::ids::ToolCallId;

/// One increment of a streamed model turn.
///
/// Forward-only, one pass per turn: text fragments concatenate into a single
/// text part, a function-call fragment opens a new part. A fragment may carry
/// both when the upstream chunk did. Fragments never arrive after an `Err`
/// item — an error terminates the sequence.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FragmentCall>,
}

/// A function call as streamed by the model. The id is optional because some
/// upstreams (Gemini) do not assign call ids; the accumulator mints one then.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FragmentCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ToolCallId>,
    pub name: String,
    pub args: serde_json::Value,
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, ModelError>> + Send>>;

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            function_call: None,
        }
    }

    pub fn call(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            text: None,
            function_call: Some(FragmentCall {
                id: None,
                name: name.into(),
                args,
            }),
        }
    }

    pub fn call_with_id(
        id: ToolCallId,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            text: None,
            function_call: Some(FragmentCall {
                id: Some(id),
                name: name.into(),
                args,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.function_call.is_none()
    }
}
