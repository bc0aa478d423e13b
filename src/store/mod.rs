//! Persistence: key-value backends and the conversation database

mod db;
mod kv;

pub use db::{
    ConversationDb, ExportPayload, ImportSummary, CURRENT_VERSION, KEY_ACTIVE_CONVERSATION,
    KEY_CONVERSATIONS, KEY_PERSONAS, KEY_VERSION,
};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
