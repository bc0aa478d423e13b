//! Chat messages, their ids and senders

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::persona::AvatarConfig;

/// Text shown while a participant is still generating
pub const PLACEHOLDER_TEXT: &str = "思考中...";

/// Label used for the user in prompts and history
pub const USER_LABEL: &str = "用户";

const SENDER_USER: &str = "user";
const SENDER_SYSTEM: &str = "系统";
const SENDER_AI: &str = "AI";

// ─────────────────────────────────────────────────────────────────
// Message Id
// ─────────────────────────────────────────────────────────────────

static LAST_MESSAGE_ID: AtomicU64 = AtomicU64::new(0);

/// Largest id accepted from storage; anything above is reassigned on load
pub const MAX_STORED_MESSAGE_ID: u64 = i64::MAX as u64;

/// Strictly increasing message identifier (wall clock microseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Allocate a new id, never equal to or below any id seen so far
    pub fn next() -> Self {
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let mut last = LAST_MESSAGE_ID.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match LAST_MESSAGE_ID.compare_exchange_weak(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return MessageId(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// Advance the generator past an id loaded from storage
    pub fn observe(id: MessageId) {
        LAST_MESSAGE_ID.fetch_max(id.0.min(MAX_STORED_MESSAGE_ID), Ordering::SeqCst);
    }

    /// Accept a stored id only when it is within the storable range
    pub fn from_stored(value: u64) -> Option<Self> {
        (value <= MAX_STORED_MESSAGE_ID).then_some(MessageId(value))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        MessageId(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────
// Sender
// ─────────────────────────────────────────────────────────────────

/// Who authored a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    User,
    Persona(String),
    System,
    /// Model output that named no known persona
    UnattributedAi,
}

impl Sender {
    /// Persisted string form
    pub fn as_str(&self) -> &str {
        match self {
            Sender::User => SENDER_USER,
            Sender::Persona(name) => name,
            Sender::System => SENDER_SYSTEM,
            Sender::UnattributedAi => SENDER_AI,
        }
    }

    /// Label used when rendering history into a prompt
    pub fn label(&self) -> &str {
        match self {
            Sender::User => USER_LABEL,
            other => other.as_str(),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Sender::User)
    }
}

impl From<String> for Sender {
    fn from(value: String) -> Self {
        match value.as_str() {
            SENDER_USER => Sender::User,
            SENDER_SYSTEM => Sender::System,
            SENDER_AI => Sender::UnattributedAi,
            _ => Sender::Persona(value),
        }
    }
}

impl From<Sender> for String {
    fn from(value: Sender) -> Self {
        match value {
            Sender::Persona(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ─────────────────────────────────────────────────────────────────
// Chat Message
// ─────────────────────────────────────────────────────────────────

/// A single entry in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Transient "thinking" placeholder, never persisted
    #[serde(skip)]
    pub thinking: bool,
}

impl ChatMessage {
    fn with_sender(sender: Sender, text: impl Into<String>, avatar: Option<AvatarConfig>) -> Self {
        Self {
            id: MessageId::next(),
            sender,
            text: text.into(),
            avatar,
            summary: None,
            thinking: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_sender(Sender::User, text, None)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_sender(Sender::System, text, Some(AvatarConfig::system()))
    }

    /// A reply whose sender was resolved (or not) from the model output
    pub fn reply(sender: Sender, text: impl Into<String>, avatar: AvatarConfig) -> Self {
        Self::with_sender(sender, text, Some(avatar))
    }

    /// Placeholder shown while a participant generates
    pub fn placeholder(avatar: Option<AvatarConfig>) -> Self {
        let mut msg = Self::with_sender(
            Sender::UnattributedAi,
            PLACEHOLDER_TEXT,
            Some(avatar.unwrap_or_else(AvatarConfig::unattributed)),
        );
        msg.thinking = true;
        msg
    }

    /// Character count used by the summarization threshold
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase() {
        let a = MessageId::next();
        let b = MessageId::next();
        let c = MessageId::next();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_observe_advances_generator() {
        let far = MessageId::from(1u64 << 60);
        MessageId::observe(far);
        assert!(MessageId::next() > far);
    }

    #[test]
    fn test_from_stored_range() {
        assert_eq!(MessageId::from_stored(42), Some(MessageId::from(42)));
        assert_eq!(MessageId::from_stored(MAX_STORED_MESSAGE_ID + 1), None);
        assert_eq!(MessageId::from_stored(u64::MAX), None);
    }

    #[test]
    fn test_sender_string_forms() {
        assert_eq!(String::from(Sender::User), "user");
        assert_eq!(String::from(Sender::System), "系统");
        assert_eq!(String::from(Sender::UnattributedAi), "AI");
        assert_eq!(Sender::from("吴军".to_string()), Sender::Persona("吴军".into()));
        assert_eq!(Sender::User.label(), "用户");
    }

    #[test]
    fn test_placeholder_not_serialized_as_thinking() {
        let msg = ChatMessage::placeholder(None);
        assert!(msg.thinking);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("thinking"));
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert!(!back.thinking);
    }

    #[test]
    fn test_message_json_shape() {
        let msg = ChatMessage::user("你好");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["sender"], "user");
        assert_eq!(value["text"], "你好");
        assert!(value.get("summary").is_none());
    }
}
