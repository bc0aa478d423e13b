//! Conversation orchestration
//!
//! Leaf-first: `matcher` and `history` have no dependencies, `prompt` builds
//! on `history`, `stream` and `summarize` talk to a `CompletionProvider`,
//! `workspace` owns state, and `engine` ties everything into a turn.

pub mod engine;
pub mod events;
pub mod history;
pub mod matcher;
pub mod prompt;
pub mod stream;
pub mod summarize;
pub mod workspace;

pub use engine::{Engine, EngineSettings, SendRequest, TurnOutcome};
pub use events::EngineEvent;
pub use matcher::{extract_direction_tag, extract_mentions, parse_attribution, resolve_name, Attribution};
pub use prompt::{build_prompt, Directive, DEFAULT_SYSTEM_PROMPT};
pub use stream::{open_stream, LinearBackoff, ResilientStream, StreamPhase, StreamPolicy};
pub use summarize::Summarizer;
pub use workspace::Workspace;
