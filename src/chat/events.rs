//! Engine events broadcast to front ends

use crate::types::{ChatMessage, MessageId};

/// Progress of a send-message turn
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A message (user, placeholder, reply or system) was added
    MessageAppended {
        conversation_id: String,
        message: ChatMessage,
    },
    /// Raw text appended to a streaming reply
    FragmentReceived {
        conversation_id: String,
        message_id: MessageId,
        fragment: String,
    },
    /// A reply reached its final sender and text
    MessageFinalized {
        conversation_id: String,
        message: ChatMessage,
    },
    MessageRemoved {
        conversation_id: String,
        message_id: MessageId,
    },
    SummaryAttached {
        conversation_id: String,
        message_id: MessageId,
    },
    TitleChanged {
        conversation_id: String,
        title: String,
    },
    TurnCompleted {
        conversation_id: String,
        replies: usize,
        errors: usize,
    },
}

impl EngineEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            EngineEvent::MessageAppended { conversation_id, .. }
            | EngineEvent::FragmentReceived { conversation_id, .. }
            | EngineEvent::MessageFinalized { conversation_id, .. }
            | EngineEvent::MessageRemoved { conversation_id, .. }
            | EngineEvent::SummaryAttached { conversation_id, .. }
            | EngineEvent::TitleChanged { conversation_id, .. }
            | EngineEvent::TurnCompleted { conversation_id, .. } => conversation_id,
        }
    }
}
