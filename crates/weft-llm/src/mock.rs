use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;

use weft_core::errors::ModelError;
use weft_core::provider::{ModelProvider, ModelRequest};
use weft_core::stream::{Fragment, FragmentStream};

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of stream items.
    Stream(Vec<Result<Fragment, ModelError>>),
    /// Return an error from the stream() call itself.
    Error(ModelError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Yield the items, then stay pending forever. Lets tests cancel a run
    /// mid-stream.
    StreamThenHang(Vec<Result<Fragment, ModelError>>),
}

impl MockResponse {
    /// Convenience: a stream carrying one text fragment.
    pub fn text(text: &str) -> Self {
        Self::Stream(vec![Ok(Fragment::text(text))])
    }

    /// Convenience: a stream of one text fragment per chunk.
    pub fn text_chunks(chunks: &[&str]) -> Self {
        Self::Stream(chunks.iter().map(|c| Ok(Fragment::text(*c))).collect())
    }

    /// Convenience: a stream ending in a function call.
    pub fn text_then_call(text: &str, name: &str, args: serde_json::Value) -> Self {
        Self::Stream(vec![
            Ok(Fragment::text(text)),
            Ok(Fragment::call(name, args)),
        ])
    }

    /// Convenience: a stream carrying only a function call.
    pub fn call(name: &str, args: serde_json::Value) -> Self {
        Self::Stream(vec![Ok(Fragment::call(name, args))])
    }

    /// Convenience: a stream that fails mid-generation.
    pub fn text_then_error(text: &str, error: ModelError) -> Self {
        Self::Stream(vec![Ok(Fragment::text(text)), Err(error)])
    }

    /// Convenience: a stream that ends without yielding anything.
    pub fn empty() -> Self {
        Self::Stream(vec![])
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every request it sees.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    json_responses: Mutex<Vec<Result<serde_json::Value, ModelError>>>,
    stream_calls: AtomicUsize,
    json_calls: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            json_responses: Mutex::new(Vec::new()),
            stream_calls: AtomicUsize::new(0),
            json_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script the outcomes of `complete_json`, consumed in order.
    pub fn with_json(self, json_responses: Vec<Result<serde_json::Value, ModelError>>) -> Self {
        *self.json_responses.lock() = json_responses;
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::Relaxed)
    }

    pub fn json_calls(&self) -> usize {
        self.json_calls.load(Ordering::Relaxed)
    }

    /// Every request passed to `stream` or `complete_json`, in arrival order.
    pub fn recorded_requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, request: &ModelRequest) -> Result<FragmentStream, ModelError> {
        self.requests.lock().push(request.clone());
        let idx = self.stream_calls.fetch_add(1, Ordering::Relaxed);

        let Some(response) = self.responses.get(idx) else {
            return Err(ModelError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }

    async fn complete_json(&self, request: &ModelRequest) -> Result<serde_json::Value, ModelError> {
        self.requests.lock().push(request.clone());
        let idx = self.json_calls.fetch_add(1, Ordering::Relaxed);

        let scripted = self.json_responses.lock().get(idx).cloned();
        match scripted {
            Some(result) => result,
            None => Err(ModelError::InvalidRequest(format!(
                "MockProvider: no JSON response configured for call {idx}"
            ))),
        }
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: &MockResponse) -> Result<FragmentStream, ModelError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(items) => {
                let items = items.clone();
                return Ok(Box::pin(stream::iter(items)));
            }
            MockResponse::StreamThenHang(items) => {
                let items = items.clone();
                return Ok(Box::pin(stream::iter(items).chain(stream::pending())));
            }
            MockResponse::Error(e) => return Err(e.clone()),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
        }
    }
}
