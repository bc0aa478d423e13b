//! Conversations and their per-conversation settings

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::message::{ChatMessage, MessageId};
use crate::error::{Error, Result};

/// Title given to every new conversation until one is generated
pub const NEW_CONVERSATION_TITLE: &str = "新对话";

/// Fixed set of conversation directions
pub const DIRECTIONS: [&str; 7] = [
    "默认",
    "深入讲讲",
    "换个视角",
    "通俗解释",
    "扩展知识",
    "批判思考",
    "进行辩论",
];

pub const DEFAULT_DIRECTION: &str = DIRECTIONS[0];

pub const MIN_CONTEXT_WINDOW: u32 = 1;
pub const MAX_CONTEXT_WINDOW: u32 = 50;
pub const DEFAULT_CONTEXT_WINDOW: u32 = 10;

/// Clamp a context window into the supported range
pub fn clamp_context_window(value: u32) -> u32 {
    value.clamp(MIN_CONTEXT_WINDOW, MAX_CONTEXT_WINDOW)
}

/// Look up a direction by name
pub fn find_direction(name: &str) -> Option<&'static str> {
    let name = name.trim();
    DIRECTIONS.iter().copied().find(|d| *d == name)
}

fn default_title() -> String {
    NEW_CONVERSATION_TITLE.to_string()
}

fn default_direction() -> String {
    DEFAULT_DIRECTION.to_string()
}

fn default_thinking_mode() -> bool {
    true
}

fn default_context_window() -> u32 {
    DEFAULT_CONTEXT_WINDOW
}

/// Read any JSON number (negative, huge, fractional) and clamp it
fn deserialize_context_window<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(match raw {
        Some(value) if !value.is_nan() => value
            .round()
            .clamp(MIN_CONTEXT_WINDOW as f64, MAX_CONTEXT_WINDOW as f64) as u32,
        _ => DEFAULT_CONTEXT_WINDOW,
    })
}

/// A chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default, with = "message_list")]
    messages: BTreeMap<MessageId, ChatMessage>,
    /// Creation time in epoch milliseconds
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub active_persona_ids: Vec<String>,
    #[serde(default = "default_direction")]
    pub direction: String,
    /// Stored preference only; not sent to the provider
    #[serde(default = "default_thinking_mode")]
    pub thinking_mode: bool,
    #[serde(default = "default_context_window", deserialize_with = "deserialize_context_window")]
    context_window: u32,
}

/// Partial update of a conversation's settings
#[derive(Debug, Clone, Default)]
pub struct ConversationSettings {
    pub active_persona_ids: Option<Vec<String>>,
    pub direction: Option<String>,
    pub thinking_mode: Option<bool>,
    pub context_window: Option<u32>,
}

impl Conversation {
    pub fn new(active_persona_ids: Vec<String>, context_window: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: default_title(),
            messages: BTreeMap::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
            pinned: false,
            active_persona_ids,
            direction: default_direction(),
            thinking_mode: true,
            context_window: clamp_context_window(context_window),
        }
    }

    pub fn context_window(&self) -> u32 {
        self.context_window
    }

    pub fn set_context_window(&mut self, value: u32) {
        self.context_window = clamp_context_window(value);
    }

    pub fn has_default_title(&self) -> bool {
        self.title == NEW_CONVERSATION_TITLE
    }

    /// All messages in order, placeholders included
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.values()
    }

    /// Messages in order with thinking placeholders left out
    pub fn real_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.values().filter(|m| !m.thinking)
    }

    pub fn real_message_count(&self) -> usize {
        self.real_messages().count()
    }

    pub fn message(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.get(&id)
    }

    pub fn has_placeholders(&self) -> bool {
        self.messages.values().any(|m| m.thinking)
    }

    pub fn push(&mut self, message: ChatMessage) -> MessageId {
        let id = message.id;
        self.messages.insert(id, message);
        id
    }

    /// Apply `f` to the message with `id`; false when it no longer exists
    pub fn update_message<F>(&mut self, id: MessageId, f: F) -> bool
    where
        F: FnOnce(&mut ChatMessage),
    {
        match self.messages.get_mut(&id) {
            Some(msg) => {
                f(msg);
                true
            }
            None => false,
        }
    }

    pub fn remove_message(&mut self, id: MessageId) -> Option<ChatMessage> {
        self.messages.remove(&id)
    }

    /// Attach a summary; never clears an existing one
    pub fn attach_summary(&mut self, id: MessageId, summary: &str) -> bool {
        let summary = summary.trim();
        if summary.is_empty() {
            return false;
        }
        self.update_message(id, |msg| msg.summary = Some(summary.to_string()))
    }

    /// Drop placeholders, clamp settings, and advance the id generator
    pub fn normalize(&mut self) {
        self.messages.retain(|_, m| !m.thinking);
        self.context_window = clamp_context_window(self.context_window);
        if find_direction(&self.direction).is_none() {
            self.direction = default_direction();
        }
        if let Some(max) = self.messages.keys().next_back() {
            MessageId::observe(*max);
        }
    }

    pub fn apply_settings(&mut self, settings: ConversationSettings) -> Result<()> {
        if let Some(ref direction) = settings.direction {
            let direction = find_direction(direction)
                .ok_or_else(|| Error::InvalidDirection(direction.clone()))?;
            self.direction = direction.to_string();
        }
        if let Some(ids) = settings.active_persona_ids {
            self.active_persona_ids = ids;
        }
        if let Some(thinking) = settings.thinking_mode {
            self.thinking_mode = thinking;
        }
        if let Some(window) = settings.context_window {
            self.set_context_window(window);
        }
        Ok(())
    }
}

/// Serialize the ordered message map as a plain list, skipping placeholders
///
/// Stored ids may be numbers or strings. When any id is unusable (not a
/// number, out of range, or out of order) every message gets a fresh id in
/// list order.
mod message_list {
    use std::collections::BTreeMap;

    use serde::de::IgnoredAny;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::message::{ChatMessage, MessageId, Sender};
    use crate::types::persona::AvatarConfig;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StoredId {
        Number(u64),
        Text(String),
        Other(IgnoredAny),
    }

    impl StoredId {
        fn usable(&self) -> Option<MessageId> {
            match self {
                StoredId::Number(n) => MessageId::from_stored(*n),
                StoredId::Text(text) => text.trim().parse().ok().and_then(MessageId::from_stored),
                StoredId::Other(_) => None,
            }
        }
    }

    #[derive(Deserialize)]
    struct StoredMessage {
        id: StoredId,
        sender: Sender,
        #[serde(default)]
        text: String,
        #[serde(default)]
        avatar: Option<AvatarConfig>,
        #[serde(default)]
        summary: Option<String>,
    }

    pub fn serialize<S>(map: &BTreeMap<MessageId, ChatMessage>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(map.values().filter(|m| !m.thinking))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<MessageId, ChatMessage>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<StoredMessage>::deserialize(deserializer)?;

        let stored: Option<Vec<MessageId>> = list.iter().map(|m| m.id.usable()).collect();
        let ids = match stored {
            Some(ids) if ids.windows(2).all(|w| w[0] < w[1]) => ids,
            _ => list.iter().map(|_| MessageId::next()).collect(),
        };

        Ok(list
            .into_iter()
            .zip(ids)
            .map(|(m, id)| {
                let message = ChatMessage {
                    id,
                    sender: m.sender,
                    text: m.text,
                    avatar: m.avatar,
                    summary: m.summary,
                    thinking: false,
                };
                (id, message)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::Sender;

    #[test]
    fn test_new_conversation_defaults() {
        let convo = Conversation::new(vec!["1".into()], 10);
        assert_eq!(convo.title, "新对话");
        assert_eq!(convo.direction, "默认");
        assert!(convo.thinking_mode);
        assert!(!convo.pinned);
        assert_eq!(convo.context_window(), 10);
    }

    #[test]
    fn test_context_window_clamped_on_creation_and_update() {
        assert_eq!(Conversation::new(vec![], 0).context_window(), 1);
        assert_eq!(Conversation::new(vec![], 99).context_window(), 50);

        let mut convo = Conversation::new(vec![], 10);
        convo
            .apply_settings(ConversationSettings {
                context_window: Some(500),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(convo.context_window(), 50);
    }

    #[test]
    fn test_invalid_direction_rejected() {
        let mut convo = Conversation::new(vec![], 10);
        let err = convo
            .apply_settings(ConversationSettings {
                direction: Some("sequential".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDirection(_)));
        assert_eq!(convo.direction, "默认");
    }

    #[test]
    fn test_merge_by_id_updates() {
        let mut convo = Conversation::new(vec![], 10);
        let first = convo.push(ChatMessage::user("a"));
        let second = convo.push(ChatMessage::user("b"));

        assert!(convo.update_message(first, |m| m.text.push('!')));
        assert_eq!(convo.message(first).unwrap().text, "a!");
        assert_eq!(convo.message(second).unwrap().text, "b");

        convo.remove_message(first);
        assert!(!convo.update_message(first, |m| m.text.clear()));
    }

    #[test]
    fn test_summary_never_cleared() {
        let mut convo = Conversation::new(vec![], 10);
        let id = convo.push(ChatMessage::user("long"));
        assert!(convo.attach_summary(id, " short "));
        assert!(!convo.attach_summary(id, "  "));
        assert_eq!(convo.message(id).unwrap().summary.as_deref(), Some("short"));
    }

    #[test]
    fn test_placeholders_not_serialized() {
        let mut convo = Conversation::new(vec![], 10);
        convo.push(ChatMessage::user("hi"));
        convo.push(ChatMessage::placeholder(None));

        let json = serde_json::to_string(&convo).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.messages().count(), 1);
        assert_eq!(back.messages().next().unwrap().sender, Sender::User);
    }

    #[test]
    fn test_context_window_clamped_on_load() {
        let load = |raw: &str| {
            let json = format!(r#"{{"id":"c","contextWindow":{}}}"#, raw);
            serde_json::from_str::<Conversation>(&json).unwrap().context_window()
        };
        assert_eq!(load("-3"), 1);
        assert_eq!(load("0"), 1);
        assert_eq!(load("12"), 12);
        assert_eq!(load("12.4"), 12);
        assert_eq!(load("99999999999999999999"), 50);
        assert_eq!(load("null"), 10);
    }

    #[test]
    fn test_string_ids_reassigned_in_order() {
        let json = r#"{"id":"c","messages":[
            {"id":"1712345678901-user","sender":"user","text":"问题"},
            {"id":"1712345678950-ai","sender":"吴军","text":"回答","summary":"要点"},
            {"id":"1712345679000-error","sender":"系统","text":"出错了"}
        ]}"#;
        let convo: Conversation = serde_json::from_str(json).unwrap();
        let texts: Vec<&str> = convo.messages().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["问题", "回答", "出错了"]);
        let senders: Vec<Sender> = convo.messages().map(|m| m.sender.clone()).collect();
        assert_eq!(senders, vec![Sender::User, Sender::Persona("吴军".into()), Sender::System]);
        assert_eq!(convo.messages().nth(1).unwrap().summary.as_deref(), Some("要点"));
    }

    #[test]
    fn test_numeric_ids_kept() {
        let json = r#"{"id":"c","messages":[
            {"id":41,"sender":"user","text":"a"},
            {"id":"42","sender":"user","text":"b"}
        ]}"#;
        let convo: Conversation = serde_json::from_str(json).unwrap();
        let ids: Vec<u64> = convo.messages().map(|m| m.id.as_u64()).collect();
        assert_eq!(ids, vec![41, 42]);
    }

    #[test]
    fn test_unusable_ids_reassigned() {
        let json = r#"{"id":"c","messages":[
            {"id":18446744073709551615,"sender":"user","text":"first"},
            {"id":7,"sender":"user","text":"second"},
            {"id":7,"sender":"user","text":"third"}
        ]}"#;
        let convo: Conversation = serde_json::from_str(json).unwrap();
        let texts: Vec<&str> = convo.messages().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(convo.messages().all(|m| m.id.as_u64() <= crate::types::MAX_STORED_MESSAGE_ID));
    }

    #[test]
    fn test_missing_fields_filled_on_load() {
        let json = r#"{"id":"c1","messages":[],"contextWindow":120}"#;
        let mut convo: Conversation = serde_json::from_str(json).unwrap();
        convo.normalize();

        assert_eq!(convo.title, "新对话");
        assert!(convo.thinking_mode);
        assert_eq!(convo.direction, "默认");
        assert_eq!(convo.context_window(), 50);
    }

    #[test]
    fn test_camel_case_keys() {
        let convo = Conversation::new(vec!["1".into()], 10);
        let value = serde_json::to_value(&convo).unwrap();
        assert!(value.get("activePersonaIds").is_some());
        assert!(value.get("contextWindow").is_some());
        assert!(value.get("createdAt").is_some());
    }
}
