//! Completion providers
//!
//! The `CompletionProvider` trait abstracts the model API; `OpenAiProvider`
//! speaks the OpenAI-compatible HTTP API and `MockProvider` replays scripts
//! for tests.

mod mock;
mod openai;
mod traits;

pub use mock::{GenerateScript, MockConfig, MockFailure, MockProvider, ScriptStep, StreamScript};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use traits::*;
