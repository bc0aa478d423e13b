//! Conversation database on top of a key-value store
//!
//! Holds the conversation list, the active conversation id, and the persona
//! roster under fixed keys, runs version migration on load, and handles
//! JSON export/import.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::kv::KeyValueStore;
use crate::error::{Error, Result};
use crate::types::{Conversation, Persona};

/// Storage keys
pub const KEY_CONVERSATIONS: &str = "conversations";
pub const KEY_ACTIVE_CONVERSATION: &str = "active-conversation-id";
pub const KEY_PERSONAS: &str = "personas";
pub const KEY_VERSION: &str = "store-version";

/// Current data layout version
pub const CURRENT_VERSION: &str = "1.0.0";

/// Shape of an export file
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub version: String,
    pub conversations: Vec<Conversation>,
    pub active_conversation_id: Option<String>,
    pub exported_at: String,
}

/// Result of a successful import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub conversations: usize,
    pub active_conversation_id: Option<String>,
}

/// Persistence for conversations and personas
#[derive(Clone)]
pub struct ConversationDb {
    store: Arc<dyn KeyValueStore>,
}

impl ConversationDb {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn decode<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(|e| Error::StorageCorrupted {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn encode<T: Serialize>(key: &str, value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(|e| Error::Internal(format!(
            "Failed to encode '{}': {}",
            key, e
        )))
    }

    // ─────────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────────

    /// Load every conversation, migrating stored data when the version differs
    pub fn conversations(&self) -> Result<Vec<Conversation>> {
        let Some(raw) = self.store.get(KEY_CONVERSATIONS)? else {
            return Ok(Vec::new());
        };

        let mut conversations: Vec<Conversation> = Self::decode(KEY_CONVERSATIONS, &raw)?;
        for convo in &mut conversations {
            convo.normalize();
        }

        let stored_version = self.store.get(KEY_VERSION)?;
        if stored_version.as_deref() != Some(CURRENT_VERSION) {
            info!(
                from = stored_version.as_deref().unwrap_or("unknown"),
                to = CURRENT_VERSION,
                count = conversations.len(),
                "Migrating stored conversations"
            );
            self.save_conversations(&conversations)?;
            self.store.set(KEY_VERSION, CURRENT_VERSION)?;
        }

        debug!(count = conversations.len(), "Conversations loaded");
        Ok(conversations)
    }

    pub fn save_conversations(&self, conversations: &[Conversation]) -> Result<()> {
        let raw = Self::encode(KEY_CONVERSATIONS, &conversations)?;
        self.store.set(KEY_CONVERSATIONS, &raw)
    }

    pub fn clear_all_conversations(&self) -> Result<()> {
        self.store.delete(KEY_CONVERSATIONS)?;
        self.store.delete(KEY_ACTIVE_CONVERSATION)
    }

    pub fn active_conversation_id(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(KEY_ACTIVE_CONVERSATION)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub fn set_active_conversation_id(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => self.store.set(KEY_ACTIVE_CONVERSATION, id),
            None => self.store.delete(KEY_ACTIVE_CONVERSATION),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Personas
    // ─────────────────────────────────────────────────────────────

    /// Stored roster, or `None` when none has ever been saved
    pub fn personas(&self) -> Result<Option<Vec<Persona>>> {
        match self.store.get(KEY_PERSONAS)? {
            Some(raw) => Ok(Some(Self::decode(KEY_PERSONAS, &raw)?)),
            None => Ok(None),
        }
    }

    pub fn save_personas(&self, personas: &[Persona]) -> Result<()> {
        let raw = Self::encode(KEY_PERSONAS, &personas)?;
        self.store.set(KEY_PERSONAS, &raw)
    }

    // ─────────────────────────────────────────────────────────────
    // Export / Import
    // ─────────────────────────────────────────────────────────────

    /// Pretty JSON document with every conversation
    pub fn export_data(&self) -> Result<String> {
        let payload = ExportPayload {
            version: CURRENT_VERSION.to_string(),
            conversations: self.conversations()?,
            active_conversation_id: self.active_conversation_id()?,
            exported_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };
        serde_json::to_string_pretty(&payload)
            .map_err(|e| Error::Internal(format!("Failed to encode export: {}", e)))
    }

    /// Replace all conversations with the ones in `json`
    ///
    /// Nothing is written unless the whole payload validates.
    pub fn import_data(&self, json: &str) -> Result<ImportSummary> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::InvalidImport(format!("not valid JSON: {}", e)))?;

        let list = match value.get("conversations") {
            Some(serde_json::Value::Array(list)) => list.clone(),
            _ => {
                return Err(Error::InvalidImport(
                    "conversations must be an array".to_string(),
                ))
            }
        };

        let mut conversations: Vec<Conversation> =
            serde_json::from_value(serde_json::Value::Array(list))
                .map_err(|e| Error::InvalidImport(e.to_string()))?;
        for convo in &mut conversations {
            convo.normalize();
        }

        let active = value
            .get("activeConversationId")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        self.save_conversations(&conversations)?;
        self.store.set(KEY_VERSION, CURRENT_VERSION)?;
        if let Some(ref id) = active {
            self.set_active_conversation_id(Some(id))?;
        }

        if let Some(ref id) = active {
            if !conversations.iter().any(|c| &c.id == id) {
                warn!(id = %id, "Imported active conversation id matches no conversation");
            }
        }
        info!(count = conversations.len(), "Data imported");

        Ok(ImportSummary {
            conversations: conversations.len(),
            active_conversation_id: active,
        })
    }
}
