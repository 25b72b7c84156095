pub mod gemini;
pub mod sse;
pub mod wire;

pub mod mock;

pub use gemini::GeminiProvider;
pub use mock::{MockProvider, MockResponse};
