//! Send-message orchestration
//!
//! One call to [`Engine::send_message`] is one turn:
//! 1. Append the user message and summarize it in the background
//! 2. Choose participants from mentions or the requested directive
//! 3. Stream one reply per participant, concurrently
//! 4. Attribute each reply to a persona and summarize it
//! 5. Name the conversation once it has enough messages

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::EngineEvent;
use super::matcher::{extract_direction_tag, extract_mentions, parse_attribution};
use super::prompt::{build_prompt, Directive};
use super::stream::{open_stream, StreamPolicy};
use super::summarize::Summarizer;
use super::workspace::Workspace;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::types::{
    AvatarConfig, ChatMessage, Conversation, ConversationSettings, MessageId, Persona, Sender,
    NEW_CONVERSATION_TITLE,
};

const EVENT_CAPACITY: usize = 1024;

// ─────────────────────────────────────────────────────────────────
// Requests and Outcomes
// ─────────────────────────────────────────────────────────────────

/// Input for one turn
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub user_text: Option<String>,
    /// Who should answer; `None` lets the model pick
    pub directive: Option<Directive>,
}

impl SendRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            user_text: Some(text.into()),
            directive: None,
        }
    }

    /// Ask for a continuation without a new user message
    pub fn next(directive: Directive) -> Self {
        Self {
            user_text: None,
            directive: Some(directive),
        }
    }
}

/// What a finished turn produced
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub user_message_id: Option<MessageId>,
    pub replies: Vec<MessageId>,
    /// Display text of every error reported as a system message
    pub errors: Vec<String>,
}

/// Engine tunables taken from `AppConfig`
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chat_model: String,
    pub chat_temperature: f32,
    pub system_prompt: String,
    pub title_min_messages: usize,
    pub title_source_messages: usize,
    pub fan_out_single_mention: bool,
    pub policy: StreamPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            chat_model: config.provider.chat_model.clone(),
            chat_temperature: config.chat.chat_temperature,
            system_prompt: config.system_prompt()?,
            title_min_messages: config.chat.title_min_messages,
            title_source_messages: config.chat.title_source_messages,
            fan_out_single_mention: config.chat.fan_out_single_mention,
            policy: StreamPolicy::from(&config.chat),
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Loading Gate
// ─────────────────────────────────────────────────────────────────

/// Claim on a conversation for the duration of one turn
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    conversation_id: String,
}

impl InFlightGuard {
    fn claim(set: &Arc<Mutex<HashSet<String>>>, conversation_id: &str) -> Result<Self> {
        if !set.lock().insert(conversation_id.to_string()) {
            return Err(Error::TurnInFlight(conversation_id.to_string()));
        }
        Ok(Self {
            set: Arc::clone(set),
            conversation_id: conversation_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.conversation_id);
    }
}

// ─────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────

/// One generation within a turn
struct Participant {
    directive: Directive,
    /// Sender used when the reply names nobody (multi-persona fan-out)
    fallback: Option<Persona>,
}

#[derive(Default)]
struct ParticipantResult {
    reply: Option<MessageId>,
    error: Option<String>,
}

/// Drives turns against a shared `Workspace`
pub struct Engine {
    workspace: Arc<Workspace>,
    provider: Arc<dyn CompletionProvider>,
    summarizer: Summarizer,
    settings: EngineSettings,
    in_flight: Arc<Mutex<HashSet<String>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(
        workspace: Arc<Workspace>,
        provider: Arc<dyn CompletionProvider>,
        summarizer: Summarizer,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            workspace,
            provider,
            summarizer,
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            background: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn from_config(
        workspace: Arc<Workspace>,
        provider: Arc<dyn CompletionProvider>,
        config: &AppConfig,
    ) -> Result<Self> {
        let summarizer = Summarizer::from_config(provider.clone(), config);
        let settings = EngineSettings::from_config(config)?;
        Ok(Self::new(workspace, provider, summarizer, settings))
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Whether a turn is running for `conversation_id`
    pub fn is_loading(&self, conversation_id: &str) -> bool {
        self.in_flight.lock().contains(conversation_id)
    }

    fn emit(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Run one turn against the active conversation
    ///
    /// Returns an error only when a precondition fails; generation failures
    /// are recorded as system messages and listed in the outcome.
    pub async fn send_message(&self, request: SendRequest) -> Result<TurnOutcome> {
        let conversation_id = self
            .workspace
            .active_conversation_id()
            .ok_or(Error::NoActiveConversation)?;

        if self.workspace.conversation(&conversation_id).is_none() {
            return Err(Error::ConversationNotFound(conversation_id));
        }

        let (direction, user_text) = match request.user_text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let (direction, cleaned) = extract_direction_tag(text);
                (direction, Some(cleaned).filter(|t| !t.is_empty()))
            }
            _ => (None, None),
        };
        if user_text.is_none() && request.directive.is_none() && direction.is_none() {
            return Err(Error::EmptyMessage);
        }

        let _guard = InFlightGuard::claim(&self.in_flight, &conversation_id)?;
        let mut outcome = TurnOutcome {
            conversation_id: conversation_id.clone(),
            ..Default::default()
        };

        if let Some(direction) = direction {
            self.workspace.update_settings(
                &conversation_id,
                ConversationSettings {
                    direction: Some(direction.to_string()),
                    ..Default::default()
                },
            )?;
            info!(conversation_id = %conversation_id, direction, "Conversation direction changed");
            if user_text.is_none() && request.directive.is_none() {
                self.finish_turn(&outcome);
                return Ok(outcome);
            }
        }

        if let Some(ref text) = user_text {
            let message = ChatMessage::user(text.clone());
            outcome.user_message_id = Some(message.id);
            self.append(&conversation_id, message.clone());
            self.workspace.persist_logged();
            self.spawn_summary(&conversation_id, message);
        }

        let Some(snapshot) = self.workspace.conversation(&conversation_id) else {
            return Err(Error::ConversationNotFound(conversation_id));
        };
        let roster = self.workspace.active_personas(&snapshot);
        if roster.is_empty() {
            let error = Error::NoActivePersona;
            warn!(conversation_id = %conversation_id, "{}", error.format_for_log());
            self.append(&conversation_id, ChatMessage::system(error.to_string()));
            outcome.errors.push(error.to_string());
            self.finish_turn(&outcome);
            return Ok(outcome);
        }

        let participants = self.plan(user_text.as_deref(), request.directive, &roster);
        debug!(
            conversation_id = %conversation_id,
            participants = participants.len(),
            "Dispatching generation"
        );

        let runs = participants
            .into_iter()
            .map(|p| self.run_participant(&conversation_id, &snapshot, &roster, p));
        for result in join_all(runs).await {
            outcome.replies.extend(result.reply);
            outcome.errors.extend(result.error);
        }

        self.maybe_spawn_title(&conversation_id);
        self.finish_turn(&outcome);
        Ok(outcome)
    }

    /// Decide who answers
    fn plan(&self, user_text: Option<&str>, directive: Option<Directive>, roster: &[Persona]) -> Vec<Participant> {
        let mentions = user_text
            .map(|text| extract_mentions(text, roster))
            .unwrap_or_default();

        let fan_out = mentions.len() >= 2 || (mentions.len() == 1 && self.settings.fan_out_single_mention);
        if fan_out {
            return mentions
                .into_iter()
                .map(|p| Participant {
                    directive: Directive::Persona(p.name.clone()),
                    fallback: Some(p),
                })
                .collect();
        }

        let directive = match mentions.into_iter().next() {
            Some(persona) => Directive::Persona(persona.name),
            None => directive.unwrap_or_default(),
        };
        vec![Participant {
            directive,
            fallback: None,
        }]
    }

    async fn run_participant(
        &self,
        conversation_id: &str,
        snapshot: &Conversation,
        roster: &[Persona],
        participant: Participant,
    ) -> ParticipantResult {
        let placeholder_avatar = match participant.directive {
            Directive::Persona(ref name) => roster.iter().find(|p| &p.name == name).map(|p| p.avatar.clone()),
            _ => None,
        };
        let placeholder = ChatMessage::placeholder(placeholder_avatar);
        let placeholder_id = placeholder.id;
        self.append(conversation_id, placeholder);

        let prompt = build_prompt(snapshot, roster, &self.settings.system_prompt, &participant.directive);
        let request = CompletionRequest::new(prompt, &self.settings.chat_model, self.settings.chat_temperature);

        let mut reply_id: Option<MessageId> = None;
        let mut raw = String::new();
        let streamed = async {
            let mut stream = open_stream(self.provider.clone(), request, self.settings.policy).await?;
            while let Some(fragment) = stream.next_fragment().await? {
                raw.push_str(&fragment);
                match reply_id {
                    None => {
                        let message = attribute(&raw, roster, participant.fallback.as_ref());
                        reply_id = Some(message.id);
                        self.remove(conversation_id, placeholder_id);
                        self.append(conversation_id, message);
                    }
                    Some(id) => {
                        self.workspace
                            .update_message(conversation_id, id, |m| m.text.push_str(&fragment));
                        self.emit(EngineEvent::FragmentReceived {
                            conversation_id: conversation_id.to_string(),
                            message_id: id,
                            fragment,
                        });
                    }
                }
            }
            Ok::<(), Error>(())
        }
        .await;

        self.remove(conversation_id, placeholder_id);

        let mut result = ParticipantResult::default();
        if let Some(id) = reply_id {
            self.finalize(conversation_id, id, &raw, roster, participant.fallback.as_ref());
            result.reply = Some(id);
        }

        if let Err(e) = streamed {
            warn!(
                conversation_id,
                directive = ?participant.directive,
                partial = reply_id.is_some(),
                "{}",
                e.format_for_log()
            );
            self.append(conversation_id, ChatMessage::system(e.to_string()));
            result.error = Some(e.to_string());
        } else if reply_id.is_none() {
            debug!(directive = ?participant.directive, "Generation produced no text");
        }
        result
    }

    /// Correct sender and text from the full reply, then summarize it
    fn finalize(
        &self,
        conversation_id: &str,
        message_id: MessageId,
        raw: &str,
        roster: &[Persona],
        fallback: Option<&Persona>,
    ) {
        let corrected = attribute(raw, roster, fallback);
        let updated = self.workspace.update_message(conversation_id, message_id, |m| {
            if corrected.sender != Sender::UnattributedAi || m.sender == Sender::UnattributedAi {
                m.sender = corrected.sender;
                m.avatar = corrected.avatar;
            }
            m.text = corrected.text;
        });
        if !updated {
            return;
        }

        if let Some(message) = self.workspace.message(conversation_id, message_id) {
            self.emit(EngineEvent::MessageFinalized {
                conversation_id: conversation_id.to_string(),
                message: message.clone(),
            });
            self.spawn_summary(conversation_id, message);
        }
    }

    fn append(&self, conversation_id: &str, message: ChatMessage) {
        if self.workspace.append_message(conversation_id, message.clone()) {
            self.emit(EngineEvent::MessageAppended {
                conversation_id: conversation_id.to_string(),
                message,
            });
        }
    }

    fn remove(&self, conversation_id: &str, message_id: MessageId) {
        if self.workspace.remove_message(conversation_id, message_id).is_some() {
            self.emit(EngineEvent::MessageRemoved {
                conversation_id: conversation_id.to_string(),
                message_id,
            });
        }
    }

    fn finish_turn(&self, outcome: &TurnOutcome) {
        self.workspace.persist_logged();
        info!(
            conversation_id = %outcome.conversation_id,
            replies = outcome.replies.len(),
            errors = outcome.errors.len(),
            "Turn completed"
        );
        self.emit(EngineEvent::TurnCompleted {
            conversation_id: outcome.conversation_id.clone(),
            replies: outcome.replies.len(),
            errors: outcome.errors.len(),
        });
    }

    // ─────────────────────────────────────────────────────────────
    // Background Jobs
    // ─────────────────────────────────────────────────────────────

    fn track(&self, handle: JoinHandle<()>) {
        let mut background = self.background.lock();
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    fn spawn_summary(&self, conversation_id: &str, message: ChatMessage) {
        if !self.summarizer.needs_summary(&message) {
            return;
        }

        let summarizer = self.summarizer.clone();
        let workspace = Arc::clone(&self.workspace);
        let events = self.events.clone();
        let conversation_id = conversation_id.to_string();

        self.track(tokio::spawn(async move {
            let Some(summary) = summarizer.summarize_if_needed(&message).await else {
                return;
            };
            if workspace.attach_summary(&conversation_id, message.id, &summary) {
                workspace.persist_logged();
                let _ = events.send(EngineEvent::SummaryAttached {
                    conversation_id,
                    message_id: message.id,
                });
            } else {
                debug!(message_id = %message.id, "Summary target no longer exists");
            }
        }));
    }

    fn maybe_spawn_title(&self, conversation_id: &str) {
        let Some(convo) = self.workspace.conversation(conversation_id) else {
            return;
        };
        if !convo.has_default_title() || convo.real_message_count() < self.settings.title_min_messages {
            return;
        }

        let source: Vec<ChatMessage> = convo
            .real_messages()
            .take(self.settings.title_source_messages)
            .cloned()
            .collect();
        let summarizer = self.summarizer.clone();
        let workspace = Arc::clone(&self.workspace);
        let events = self.events.clone();
        let conversation_id = conversation_id.to_string();

        self.track(tokio::spawn(async move {
            let title = match summarizer.generate_title(&source).await {
                Ok(title) => title,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "Title generation failed");
                    return;
                }
            };
            if title.is_empty() || title == NEW_CONVERSATION_TITLE {
                return;
            }
            if workspace.set_title_if_default(&conversation_id, &title) {
                workspace.persist_logged();
                info!(conversation_id = %conversation_id, title = %title, "Conversation titled");
                let _ = events.send(EngineEvent::TitleChanged { conversation_id, title });
            }
        }));
    }

    /// Wait for every background summary and title job started so far
    pub async fn wait_background(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.background.lock());
            if handles.is_empty() {
                return;
            }
            for result in join_all(handles).await {
                if let Err(e) = result {
                    warn!(error = %e, "Background job panicked");
                }
            }
        }
    }
}

/// Resolve the speaker of `raw` into a reply message
fn attribute(raw: &str, roster: &[Persona], fallback: Option<&Persona>) -> ChatMessage {
    let parsed = parse_attribution(raw, roster);
    let speaker = parsed
        .persona_name
        .as_deref()
        .and_then(|name| roster.iter().find(|p| p.name == name))
        .or(fallback);

    match speaker {
        Some(persona) => ChatMessage::reply(
            Sender::Persona(persona.name.clone()),
            parsed.cleaned_text,
            persona.avatar.clone(),
        ),
        None => ChatMessage::reply(Sender::UnattributedAi, parsed.cleaned_text, AvatarConfig::unattributed()),
    }
}
