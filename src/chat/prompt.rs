//! Prompt assembly
//!
//! Fills the base template's `{{personaProfiles}}`, `{{direction}}`,
//! `{{history}}` and `{{instruction}}` placeholders from conversation state.

use super::history::format_history;
use crate::types::{Conversation, Persona};

pub const PLACEHOLDER_PROFILES: &str = "{{personaProfiles}}";
pub const PLACEHOLDER_DIRECTION: &str = "{{direction}}";
pub const PLACEHOLDER_HISTORY: &str = "{{history}}";
pub const PLACEHOLDER_INSTRUCTION: &str = "{{instruction}}";

/// Built-in base template
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"
**SYSTEM PROMPT**

你是一个多角色AI群聊协调员。你的任务是根据当前对话的上下文，扮演“活跃人设”列表中的一个角色来与用户互动。

**核心规则:**
1.  **严格角色扮演:** 你的每一次回复都必须且只能扮演“活跃人设”列表中的一个角色。
2.  **格式要求:** 回复必须以角色的名字和冒号开头，例如 "吴军: "。 你的回复内容本身不要包含你的角色名。
3.  **遵循指令:** 严格遵守下方的“当前任务指令”，它会告诉你应该由谁、以何种方式来回答。
4.  **自然对话:** 让对话像一个真实的群聊，角色之间可以有不同的观点，但要保持对话的连贯性。
5.  **Markdown格式:** 请使用Markdown格式化你的回复，以提高可读性。

**活跃人设:**
{{personaProfiles}}

**对话方向:**
当前方向是：“{{direction}}”。你本次的回答必须严格遵循这个方向的要求。例如，如果是“通俗解释”，就要用最简单易懂的语言来解释，避免使用专业术语。如果是“深入讲讲”，就要提供更详尽的细节和背景信息。

**对话历史:**
{{history}}

**当前任务指令:**
{{instruction}}

现在，请根据以上所有信息，生成你的回复。
"#;

/// Who should speak next
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Directive {
    /// Pick the most suitable persona for the latest question
    #[default]
    Auto,
    /// The user asked the model to choose who continues
    LetAiChoose,
    /// A named persona must answer
    Persona(String),
}

impl Directive {
    /// Instruction text injected into `{{instruction}}`
    pub fn instruction(&self) -> String {
        match self {
            Directive::Auto => {
                "分析用户的最新问题和对话历史，从下方“活跃人设”中选择一位最合适的角色进行回答。"
                    .to_string()
            }
            Directive::LetAiChoose => {
                "用户让你来决定谁来接话。请分析对话历史，选择一个最合理的角色，以其口吻和风格延续对话。"
                    .to_string()
            }
            Directive::Persona(name) => format!(
                "用户指定了由 **{}** 来回答。你必须使用 {} 的人设、口吻和风格来生成回应。",
                name, name
            ),
        }
    }
}

/// Render persona profiles for `{{personaProfiles}}`
pub fn format_persona_profiles(personas: &[Persona]) -> String {
    personas
        .iter()
        .map(|p| format!("---\n**姓名:** {}\n**人设简介:** {}\n---", p.name, p.prompt))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace the first occurrence of each placeholder in one pass
///
/// Substituted values are never scanned again, so history text that
/// happens to contain a placeholder is left intact.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut hits: Vec<(usize, &str, &str)> = values
        .iter()
        .filter_map(|(key, value)| template.find(key).map(|pos| (pos, *key, *value)))
        .collect();
    hits.sort_by_key(|(pos, _, _)| *pos);

    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    for (pos, key, value) in hits {
        if pos < cursor {
            continue;
        }
        out.push_str(&template[cursor..pos]);
        out.push_str(value);
        cursor = pos + key.len();
    }
    out.push_str(&template[cursor..]);
    out
}

/// Build the full prompt for one generation
pub fn build_prompt(
    conversation: &Conversation,
    active_personas: &[Persona],
    base_template: &str,
    directive: &Directive,
) -> String {
    let template = if base_template.trim().is_empty() {
        DEFAULT_SYSTEM_PROMPT
    } else {
        base_template
    };

    let profiles = format_persona_profiles(active_personas);
    let history = format_history(conversation.real_messages(), conversation.context_window());
    let instruction = directive.instruction();

    fill_template(
        template,
        &[
            (PLACEHOLDER_PROFILES, &profiles),
            (PLACEHOLDER_DIRECTION, &conversation.direction),
            (PLACEHOLDER_HISTORY, &history),
            (PLACEHOLDER_INSTRUCTION, &instruction),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{default_personas, ChatMessage};

    #[test]
    fn test_profiles_format() {
        let roster = vec![Persona::new("Alice", "friendly", None)];
        assert_eq!(
            format_persona_profiles(&roster),
            "---\n**姓名:** Alice\n**人设简介:** friendly\n---"
        );
    }

    #[test]
    fn test_instruction_variants() {
        assert!(Directive::Auto.instruction().contains("选择一位最合适的角色"));
        assert!(Directive::LetAiChoose.instruction().contains("决定谁来接话"));
        assert!(Directive::Persona("吴军".into()).instruction().contains("**吴军**"));
    }

    #[test]
    fn test_fill_template_single_pass() {
        let out = fill_template(
            "H: {{history}} / I: {{instruction}}",
            &[("{{history}}", "user typed {{instruction}}"), ("{{instruction}}", "go")],
        );
        assert_eq!(out, "H: user typed {{instruction}} / I: go");
    }

    #[test]
    fn test_fill_template_first_occurrence_only_and_missing_ignored() {
        let out = fill_template("{{direction}} {{direction}}", &[
            ("{{direction}}", "默认"),
            ("{{history}}", "unused"),
        ]);
        assert_eq!(out, "默认 {{direction}}");
    }

    #[test]
    fn test_build_prompt_with_default_template() {
        let roster = default_personas();
        let mut convo = crate::types::Conversation::new(vec![], 10);
        convo.push(ChatMessage::user("什么是熵？"));

        let prompt = build_prompt(&convo, &roster, "  ", &Directive::Persona("吴军".into()));
        assert!(prompt.contains("**SYSTEM PROMPT**"));
        assert!(prompt.contains("**姓名:** 贾行家"));
        assert!(prompt.contains("当前方向是：“默认”"));
        assert!(prompt.contains("用户: 什么是熵？"));
        assert!(prompt.contains("用户指定了由 **吴军** 来回答"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_build_prompt_custom_template() {
        let convo = crate::types::Conversation::new(vec![], 10);
        let prompt = build_prompt(&convo, &[], "Only {{instruction}}", &Directive::LetAiChoose);
        assert_eq!(prompt, format!("Only {}", Directive::LetAiChoose.instruction()));
    }
}
