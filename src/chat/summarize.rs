//! Message summarization and conversation titles

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::types::ChatMessage;

const SUMMARY_TEMPERATURE: f32 = 0.3;
const TITLE_TEMPERATURE: f32 = 0.5;

fn summary_prompt(text: &str) -> String {
    format!(
        "请将以下文本总结为一段简洁的核心摘要，保留关键信息和语气，用于后续的AI上下文参考。\n\n文本：\n{}\n\n摘要：",
        text
    )
}

fn title_prompt(history: &str) -> String {
    format!(
        "根据以下对话内容，生成一个简洁的、不超过10个字的中文标题。\n\n对话内容：\n{}\n\n标题：",
        history
    )
}

/// Strip quotes and one trailing period from a model-produced title
pub fn clean_title(raw: &str) -> String {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '“' | '”'))
        .collect();
    let stripped = stripped.trim();
    let stripped = stripped
        .strip_suffix('。')
        .or_else(|| stripped.strip_suffix('.'))
        .unwrap_or(stripped);
    stripped.trim().to_string()
}

/// Condenses long messages and names conversations using the summary model
#[derive(Clone)]
pub struct Summarizer {
    provider: Arc<dyn CompletionProvider>,
    model: String,
    threshold_chars: usize,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn CompletionProvider>, model: impl Into<String>, threshold_chars: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            threshold_chars,
        }
    }

    pub fn from_config(provider: Arc<dyn CompletionProvider>, config: &AppConfig) -> Self {
        Self::new(
            provider,
            config.provider.summary_model.clone(),
            config.chat.summary_threshold_chars,
        )
    }

    pub fn needs_summary(&self, message: &ChatMessage) -> bool {
        message.char_len() > self.threshold_chars
    }

    /// Summary for a long message; `None` when short or when generation fails
    pub async fn summarize_if_needed(&self, message: &ChatMessage) -> Option<String> {
        if !self.needs_summary(message) {
            return None;
        }

        let request = CompletionRequest::new(summary_prompt(&message.text), &self.model, SUMMARY_TEMPERATURE);
        match self.provider.generate_completion(&request).await {
            Ok(text) => {
                let summary = text.trim();
                if summary.is_empty() {
                    warn!(message_id = %message.id, "Summary came back empty");
                    return None;
                }
                debug!(
                    message_id = %message.id,
                    original_chars = message.char_len(),
                    summary_chars = summary.chars().count(),
                    "Message summarized"
                );
                Some(summary.to_string())
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Summarization failed");
                None
            }
        }
    }

    /// Short title for a conversation built from its opening messages
    pub async fn generate_title(&self, messages: &[ChatMessage]) -> Result<String> {
        let history = messages
            .iter()
            .map(|m| format!("{}: {}", m.sender.label(), m.text))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest::new(title_prompt(&history), &self.model, TITLE_TEMPERATURE);
        let raw = self.provider.generate_completion(&request).await?;
        Ok(clean_title(&raw))
    }
}
