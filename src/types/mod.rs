//! Type definitions for persona-chat
//!
//! Personas, chat messages, and conversations as they are held in memory
//! and persisted.

mod conversation;
mod message;
mod persona;

pub use conversation::*;
pub use message::*;
pub use persona::*;
