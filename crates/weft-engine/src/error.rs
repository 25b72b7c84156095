use weft_core::errors::ModelError;
use weft_core::ids::ThreadId;
use weft_store::StoreError;

/// Errors that terminate an invocation.
///
/// Tool failures never show up here: the dispatcher turns every one of them
/// into an error-shaped `ToolResult` that is persisted and handed back to
/// the model.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The incoming event failed validation. Nothing was persisted or
    /// emitted for it.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The thread already has an active invocation.
    #[error("thread {0} already has an active turn")]
    AlreadyRunning(ThreadId),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let e = EngineError::InvalidEvent("message has no parts".into());
        assert_eq!(e.to_string(), "invalid event: message has no parts");

        let id = ThreadId::from_raw("thread-1");
        let e = EngineError::AlreadyRunning(id);
        assert_eq!(e.to_string(), "thread thread-1 already has an active turn");
    }

    #[test]
    fn model_errors_convert() {
        let e: EngineError = ModelError::EmptyResponse.into();
        assert!(matches!(e, EngineError::Model(_)));
        assert_eq!(e.to_string(), "model error: empty response from model");
    }

    #[test]
    fn store_errors_convert() {
        let e: EngineError = StoreError::NotFound("message abc".into()).into();
        assert!(matches!(e, EngineError::Store(_)));
    }
}
