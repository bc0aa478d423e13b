//! Conversation history rendering for prompts
//!
//! The most recent `context_window` messages are rendered verbatim; older
//! ones are rendered through their summaries.

use crate::types::{ChatMessage, DEFAULT_CONTEXT_WINDOW};

/// Separator placed between summarized and verbatim history
pub const SUMMARY_SEPARATOR: &str = "\n\n(--- 部分历史记录为AI总结 ---)\n\n";

/// Characters of raw text kept when an older message has no summary
const FALLBACK_PREVIEW_CHARS: usize = 50;

fn format_line(msg: &ChatMessage, use_summary: bool) -> String {
    let content = if use_summary {
        match msg.summary {
            Some(ref summary) => summary.clone(),
            None => {
                let preview: String = msg.text.chars().take(FALLBACK_PREVIEW_CHARS).collect();
                format!("(总结) {}...", preview)
            }
        }
    } else {
        msg.text.clone()
    };
    format!("{}: {}", msg.sender.label(), content)
}

/// Render messages as prompt history
///
/// Thinking placeholders are skipped. A `context_window` of 0 falls back
/// to the default window.
pub fn format_history<'a, I>(messages: I, context_window: u32) -> String
where
    I: IntoIterator<Item = &'a ChatMessage>,
{
    let messages: Vec<&ChatMessage> = messages.into_iter().filter(|m| !m.thinking).collect();
    let window = if context_window == 0 {
        DEFAULT_CONTEXT_WINDOW
    } else {
        context_window
    } as usize;

    let split = messages.len().saturating_sub(window);
    let (older, recent) = messages.split_at(split);

    let older = older
        .iter()
        .map(|m| format_line(m, true))
        .collect::<Vec<_>>()
        .join("\n");
    let recent = recent
        .iter()
        .map(|m| format_line(m, false))
        .collect::<Vec<_>>()
        .join("\n");

    match (older.is_empty(), recent.is_empty()) {
        (false, false) => format!("{}{}{}", older, SUMMARY_SEPARATOR, recent),
        (false, true) => older,
        _ => recent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AvatarConfig, Sender};

    fn persona_msg(name: &str, text: &str) -> ChatMessage {
        ChatMessage::reply(Sender::Persona(name.to_string()), text, AvatarConfig::default())
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(format_history(&Vec::<ChatMessage>::new(), 10), "");
    }

    #[test]
    fn test_all_recent_has_no_separator() {
        let msgs = vec![ChatMessage::user("你好"), persona_msg("吴军", "你好，朋友")];
        let history = format_history(&msgs, 10);
        assert_eq!(history, "用户: 你好\n吴军: 你好，朋友");
    }

    #[test]
    fn test_older_messages_use_summary_or_preview() {
        let mut summarized = ChatMessage::user("很长的一段话");
        summarized.summary = Some("摘要一".to_string());
        let long_text = "字".repeat(80);
        let unsummarized = persona_msg("万维钢", &long_text);
        let recent = ChatMessage::user("最新的问题");

        let history = format_history(&[summarized, unsummarized, recent], 1);
        let expected = format!(
            "用户: 摘要一\n万维钢: (总结) {}...{}用户: 最新的问题",
            "字".repeat(50),
            SUMMARY_SEPARATOR
        );
        assert_eq!(history, expected);
    }

    #[test]
    fn test_zero_window_uses_default() {
        let msgs: Vec<ChatMessage> = (0..12).map(|i| ChatMessage::user(format!("m{}", i))).collect();
        let history = format_history(&msgs, 0);
        let (older, recent) = history.split_once(SUMMARY_SEPARATOR).unwrap();
        assert_eq!(older.lines().count(), 2);
        assert_eq!(recent.lines().count(), 10);
    }

    #[test]
    fn test_placeholders_excluded() {
        let msgs = vec![ChatMessage::user("问"), ChatMessage::placeholder(None)];
        assert_eq!(format_history(&msgs, 10), "用户: 问");
    }
}
