//! In-memory conversation and persona state
//!
//! The `Workspace` is the single owner of loaded conversations and the
//! persona roster. Message mutations are closures applied to the message
//! addressed by id, so concurrent replies never overwrite each other.
//! Changes reach disk through `persist()`.

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::{ConversationDb, ImportSummary};
use crate::types::{
    default_personas, AvatarConfig, ChatMessage, Conversation, ConversationSettings, MessageId,
    Persona,
};

struct State {
    conversations: Vec<Conversation>,
    active_id: Option<String>,
    personas: Vec<Persona>,
}

/// Thread-safe conversation and persona state backed by a `ConversationDb`
pub struct Workspace {
    db: ConversationDb,
    state: RwLock<State>,
    /// Keeps snapshots reaching the store in the order they were taken
    persist_lock: Mutex<()>,
    default_context_window: u32,
}

impl Workspace {
    /// Load state from `db`
    ///
    /// Seeds the default roster when none is stored, creates a first
    /// conversation when the store is empty, and repairs a dangling active id.
    pub fn open(db: ConversationDb, default_context_window: u32) -> Result<Self> {
        let personas = match db.personas()? {
            Some(personas) => personas,
            None => {
                let defaults = default_personas();
                db.save_personas(&defaults)?;
                defaults
            }
        };

        let conversations = db.conversations()?;
        let active_id = db.active_conversation_id()?;

        let workspace = Self {
            db,
            state: RwLock::new(State {
                conversations,
                active_id,
                personas,
            }),
            persist_lock: Mutex::new(()),
            default_context_window,
        };
        workspace.repair_active()?;

        debug!(
            conversations = workspace.state.read().conversations.len(),
            personas = workspace.state.read().personas.len(),
            "Workspace opened"
        );
        Ok(workspace)
    }

    fn repair_active(&self) -> Result<()> {
        let needs_new = self.state.read().conversations.is_empty();
        if needs_new {
            self.create_conversation()?;
            return Ok(());
        }

        let fixed = {
            let mut state = self.state.write();
            let valid = state
                .active_id
                .as_deref()
                .is_some_and(|id| state.conversations.iter().any(|c| c.id == id));
            if valid {
                false
            } else {
                state.active_id = state.conversations.first().map(|c| c.id.clone());
                true
            }
        };
        if fixed {
            self.persist()?;
        }
        Ok(())
    }

    pub fn db(&self) -> &ConversationDb {
        &self.db
    }

    /// Write conversations, the active id and the roster to the store
    pub fn persist(&self) -> Result<()> {
        let _persist = self.persist_lock.lock();
        let (conversations, active_id, personas) = {
            let state = self.state.read();
            (
                state.conversations.clone(),
                state.active_id.clone(),
                state.personas.clone(),
            )
        };
        self.db.save_conversations(&conversations)?;
        self.db.set_active_conversation_id(active_id.as_deref())?;
        self.db.save_personas(&personas)
    }

    /// `persist()` for checkpoints where a failure must not abort the caller
    pub fn persist_logged(&self) {
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist workspace");
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────────

    /// Conversations for display: pinned first, then newest first
    pub fn list_conversations(&self) -> Vec<Conversation> {
        let mut list = self.state.read().conversations.clone();
        list.sort_by(|a, b| b.pinned.cmp(&a.pinned).then(b.created_at.cmp(&a.created_at)));
        list
    }

    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        self.state.read().conversations.iter().find(|c| c.id == id).cloned()
    }

    pub fn active_conversation_id(&self) -> Option<String> {
        self.state.read().active_id.clone()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        let id = self.active_conversation_id()?;
        self.conversation(&id)
    }

    /// Create a conversation with every persona active and make it current
    pub fn create_conversation(&self) -> Result<Conversation> {
        let conversation = {
            let mut state = self.state.write();
            let ids = state.personas.iter().map(|p| p.id.clone()).collect();
            let conversation = Conversation::new(ids, self.default_context_window);
            state.conversations.insert(0, conversation.clone());
            state.active_id = Some(conversation.id.clone());
            conversation
        };
        info!(conversation_id = %conversation.id, "Conversation created");
        self.persist()?;
        Ok(conversation)
    }

    pub fn switch_conversation(&self, id: &str) -> Result<()> {
        {
            let mut state = self.state.write();
            if !state.conversations.iter().any(|c| c.id == id) {
                return Err(Error::ConversationNotFound(id.to_string()));
            }
            state.active_id = Some(id.to_string());
        }
        self.persist()
    }

    /// Delete a conversation; the first remaining one becomes active if needed
    pub fn delete_conversation(&self, id: &str) -> Result<()> {
        {
            let mut state = self.state.write();
            let before = state.conversations.len();
            state.conversations.retain(|c| c.id != id);
            if state.conversations.len() == before {
                return Err(Error::ConversationNotFound(id.to_string()));
            }
            if state.active_id.as_deref() == Some(id) {
                state.active_id = state.conversations.first().map(|c| c.id.clone());
            }
        }
        info!(conversation_id = %id, "Conversation deleted");
        self.persist()
    }

    pub fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        let title = title.trim().to_string();
        self.modify_conversation(id, |c| {
            c.title = title;
            Ok(())
        })
    }

    pub fn set_pinned(&self, id: &str, pinned: bool) -> Result<()> {
        self.modify_conversation(id, |c| {
            c.pinned = pinned;
            Ok(())
        })
    }

    pub fn update_settings(&self, id: &str, settings: ConversationSettings) -> Result<()> {
        self.modify_conversation(id, |c| c.apply_settings(settings))
    }

    pub fn clear_all_conversations(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            state.conversations.clear();
            state.active_id = None;
        }
        self.db.clear_all_conversations()?;
        info!("All conversations cleared");
        Ok(())
    }

    fn modify_conversation<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Conversation) -> Result<()>,
    {
        {
            let mut state = self.state.write();
            let convo = state
                .conversations
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| Error::ConversationNotFound(id.to_string()))?;
            f(convo)?;
        }
        self.persist()
    }

    // ─────────────────────────────────────────────────────────────
    // Messages (merge by id, not persisted until `persist()`)
    // ─────────────────────────────────────────────────────────────

    /// Run `f` against a live conversation; `None` when it was deleted
    pub fn with_conversation<R, F>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut Conversation) -> R,
    {
        let mut state = self.state.write();
        state.conversations.iter_mut().find(|c| c.id == id).map(f)
    }

    pub fn append_message(&self, conversation_id: &str, message: ChatMessage) -> bool {
        self.with_conversation(conversation_id, |c| {
            c.push(message);
        })
        .is_some()
    }

    pub fn update_message<F>(&self, conversation_id: &str, message_id: MessageId, f: F) -> bool
    where
        F: FnOnce(&mut ChatMessage),
    {
        self.with_conversation(conversation_id, |c| c.update_message(message_id, f))
            .unwrap_or(false)
    }

    pub fn remove_message(&self, conversation_id: &str, message_id: MessageId) -> Option<ChatMessage> {
        self.with_conversation(conversation_id, |c| c.remove_message(message_id))
            .flatten()
    }

    pub fn message(&self, conversation_id: &str, message_id: MessageId) -> Option<ChatMessage> {
        self.state
            .read()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .and_then(|c| c.message(message_id).cloned())
    }

    /// No-op for a deleted conversation or message
    pub fn attach_summary(&self, conversation_id: &str, message_id: MessageId, summary: &str) -> bool {
        self.with_conversation(conversation_id, |c| c.attach_summary(message_id, summary))
            .unwrap_or(false)
    }

    /// Set the title only while it is still the default
    pub fn set_title_if_default(&self, conversation_id: &str, title: &str) -> bool {
        self.with_conversation(conversation_id, |c| {
            if !c.has_default_title() {
                return false;
            }
            c.title = title.to_string();
            true
        })
        .unwrap_or(false)
    }

    // ─────────────────────────────────────────────────────────────
    // Personas
    // ─────────────────────────────────────────────────────────────

    pub fn personas(&self) -> Vec<Persona> {
        self.state.read().personas.clone()
    }

    /// Find a persona by id, then by name
    pub fn find_persona(&self, key: &str) -> Option<Persona> {
        let state = self.state.read();
        state
            .personas
            .iter()
            .find(|p| p.id == key)
            .or_else(|| state.personas.iter().find(|p| p.name == key))
            .cloned()
    }

    /// Roster personas active in `conversation`, in roster order
    pub fn active_personas(&self, conversation: &Conversation) -> Vec<Persona> {
        self.state
            .read()
            .personas
            .iter()
            .filter(|p| conversation.active_persona_ids.contains(&p.id))
            .cloned()
            .collect()
    }

    pub fn add_persona(&self, name: &str, prompt: &str, avatar: Option<AvatarConfig>) -> Result<Persona> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::config_field_invalid("name", "Persona name must not be empty"));
        }

        let persona = {
            let mut state = self.state.write();
            if state.personas.iter().any(|p| p.name == name) {
                return Err(Error::DuplicatePersona(name.to_string()));
            }
            let persona = Persona::new(name, prompt.trim(), avatar);
            state.personas.push(persona.clone());
            persona
        };
        info!(persona = %persona.name, id = %persona.id, "Persona added");
        self.persist()?;
        Ok(persona)
    }

    /// Replace the stored persona with the same id
    pub fn update_persona(&self, mut persona: Persona) -> Result<()> {
        persona.name = persona.name.trim().to_string();
        if persona.name.is_empty() {
            return Err(Error::config_field_invalid("name", "Persona name must not be empty"));
        }
        {
            let mut state = self.state.write();
            if state.personas.iter().any(|p| p.name == persona.name && p.id != persona.id) {
                return Err(Error::DuplicatePersona(persona.name));
            }
            let slot = state
                .personas
                .iter_mut()
                .find(|p| p.id == persona.id)
                .ok_or_else(|| Error::PersonaNotFound(persona.id.clone()))?;
            info!(persona = %persona.name, id = %persona.id, "Persona updated");
            *slot = persona;
        }
        self.persist()
    }

    /// Remove a persona by id or name, dropping it from every conversation
    pub fn remove_persona(&self, key: &str) -> Result<Persona> {
        let removed = {
            let mut state = self.state.write();
            let idx = state
                .personas
                .iter()
                .position(|p| p.id == key)
                .or_else(|| state.personas.iter().position(|p| p.name == key))
                .ok_or_else(|| Error::PersonaNotFound(key.to_string()))?;
            let removed = state.personas.remove(idx);
            for convo in &mut state.conversations {
                convo.active_persona_ids.retain(|id| *id != removed.id);
            }
            removed
        };
        info!(persona = %removed.name, "Persona removed");
        self.persist()?;
        Ok(removed)
    }

    pub fn reset_personas(&self) -> Result<()> {
        self.state.write().personas = default_personas();
        self.persist()
    }

    // ─────────────────────────────────────────────────────────────
    // Export / Import
    // ─────────────────────────────────────────────────────────────

    pub fn export_data(&self) -> Result<String> {
        self.persist()?;
        self.db.export_data()
    }

    /// Replace all conversations from an export and reload state
    pub fn import_data(&self, json: &str) -> Result<ImportSummary> {
        let summary = self.db.import_data(json)?;
        let conversations = self.db.conversations()?;
        let active_id = self.db.active_conversation_id()?;
        {
            let mut state = self.state.write();
            state.conversations = conversations;
            state.active_id = active_id;
        }
        self.repair_active()?;
        info!(conversations = summary.conversations, "Data imported");
        Ok(summary)
    }
}
