pub mod accumulate;
pub mod dispatch;
pub mod error;
pub mod next_speaker;
pub mod registry;
pub mod runner;
pub mod service;
pub mod tools;

pub use dispatch::{Dispatch, Dispatcher};
pub use error::EngineError;
pub use next_speaker::{ContinuationOracle, NextSpeaker, NextSpeakerDecision};
pub use registry::ToolRegistry;
pub use runner::{AgentRunner, IgnoredCallPolicy, RefusalPolicy, RunOutcome, RunnerConfig, MAX_TURNS};
pub use service::AgentService;
pub use tools::create_default_registry;
