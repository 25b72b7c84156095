use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use weft_core::errors::ModelError;
use weft_core::provider::{ModelProvider, ModelRequest};
use weft_core::stream::{Fragment, FragmentStream};

use crate::sse;
use crate::wire;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub struct GeminiProvider {
    client: Client,
    api_key: SecretString,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: SecretString, model: Option<&str>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }

    fn endpoint(&self, verb: &str) -> String {
        format!("{API_BASE}/{}:{verb}", self.model)
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(body)
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn stream(&self, request: &ModelRequest) -> Result<FragmentStream, ModelError> {
        let body = wire::build_request_body(request);
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));

        let resp = self
            .post_json(&url, &body)
            .send()
            .await
            .map_err(|e| ModelError::ConnectionFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status, wire::error_message(&body)));
        }

        let byte_stream = resp.bytes_stream();
        Ok(Box::pin(SseStream::new(byte_stream)))
    }

    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn complete_json(&self, request: &ModelRequest) -> Result<serde_json::Value, ModelError> {
        let body = wire::build_json_request_body(request);
        let url = self.endpoint("generateContent");

        let resp = self
            .post_json(&url, &body)
            .send()
            .await
            .map_err(|e| ModelError::ConnectionFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status, wire::error_message(&body)));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| ModelError::StreamInterrupted(e.to_string()))?;
        let parsed: wire::GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| ModelError::Decode(format!("response body: {e}")))?;

        let json_text = wire::first_candidate_text(&parsed).ok_or(ModelError::EmptyResponse)?;
        serde_json::from_str(&json_text)
            .map_err(|e| ModelError::Decode(format!("constrained output: {e}")))
    }
}

/// Wraps the response byte stream and yields parsed fragments.
/// Includes an idle timeout — if no data arrives within `idle_duration`,
/// yields an error item.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: String,
    pending: Vec<Result<Fragment, ModelError>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
}

impl SseStream {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self::with_idle_timeout(byte_stream, SSE_IDLE_TIMEOUT)
    }

    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: String::new(),
            pending: Vec::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
        }
    }

    fn decode_chunk(&mut self, chunk: &str) {
        for payload in sse::parse_sse_data(chunk) {
            match serde_json::from_str::<wire::GenerateContentResponse>(&payload) {
                Ok(resp) => self.pending.extend(wire::fragments(&resp).into_iter().map(Ok)),
                Err(e) => self
                    .pending
                    .push(Err(ModelError::Decode(format!("stream chunk: {e}")))),
            }
        }
    }
}

impl Stream for SseStream {
    type Item = Result<Fragment, ModelError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        // Return pending fragments first
        if !self.pending.is_empty() {
            return std::task::Poll::Ready(Some(self.pending.remove(0)));
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(bytes))) => {
                    // Data received — reset idle timer
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    let text = String::from_utf8_lossy(&bytes);
                    self.buffer.push_str(&text);

                    // Process complete SSE events from the buffer
                    while let Some(pos) = self.buffer.find("\n\n") {
                        let chunk = self.buffer[..pos + 2].to_string();
                        self.buffer = self.buffer[pos + 2..].to_string();
                        self.decode_chunk(&chunk);
                    }

                    if !self.pending.is_empty() {
                        return std::task::Poll::Ready(Some(self.pending.remove(0)));
                    }
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    return std::task::Poll::Ready(Some(Err(ModelError::StreamInterrupted(
                        e.to_string(),
                    ))));
                }
                std::task::Poll::Ready(None) => {
                    // Stream ended — process remaining buffer
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        self.decode_chunk(&remaining);
                        if !self.pending.is_empty() {
                            return std::task::Poll::Ready(Some(self.pending.remove(0)));
                        }
                    }
                    return std::task::Poll::Ready(None);
                }
                std::task::Poll::Pending => {
                    // No data available — check idle timeout
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        return std::task::Poll::Ready(Some(Err(ModelError::StreamInterrupted(
                            format!("idle timeout after {}s", self.idle_duration.as_secs()),
                        ))));
                    }
                    return std::task::Poll::Pending;
                }
            }
        }
    }
}
