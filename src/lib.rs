//! Persona Chat
//!
//! Multi-persona chat client library: routes user messages to persona
//! profiles, streams attributed replies from an OpenAI-compatible provider,
//! and keeps long conversations compact through background summarization.

pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod store;
pub mod types;
pub mod version;

pub use error::{Error, ErrorCode, Result};
