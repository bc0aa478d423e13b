//! Persona name matching in free text
//!
//! Resolves `@name` mentions in user input, speaker prefixes in model
//! output, and `#direction` tags.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{strip_whitespace, Persona, DIRECTIONS};

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([\x{4e00}-\x{9fa5}a-zA-Z0-9_]+)").expect("invalid MENTION_RE regex")
});

/// Speaker prefix shapes, in priority order
static ATTRIBUTION_RES: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        // Name: content
        Regex::new(r"(?s)^([^:*\n][^:\n]*?):\s*(.*)$").expect("invalid plain attribution regex"),
        // **Name**: content
        Regex::new(r"(?s)^\*\*([^*:\n]+?)\*\*:\s*(.*)$").expect("invalid bold attribution regex"),
        // **Name:** content
        Regex::new(r"(?s)^\*\*([^*:\n]+?):\*\*\s*(.*)$")
            .expect("invalid bold-colon attribution regex"),
        // Name：content
        Regex::new(r"(?s)^([^：\n]+?)：\s*(.*)$").expect("invalid full-width attribution regex"),
    ]
});

/// Speaker resolved from the start of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    /// Roster name of the speaker, if one was recognised
    pub persona_name: Option<String>,
    /// Reply text with the speaker prefix removed
    pub cleaned_text: String,
}

/// Find a persona by exact name, then ignoring whitespace
pub fn resolve_name<'a>(name: &str, roster: &'a [Persona]) -> Option<&'a Persona> {
    if let Some(p) = roster.iter().find(|p| p.name == name) {
        return Some(p);
    }
    let compact = strip_whitespace(name);
    roster.iter().find(|p| p.compact_name() == compact)
}

/// Personas named with `@name` in `text`, in order of first mention
pub fn extract_mentions(text: &str, roster: &[Persona]) -> Vec<Persona> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut found: Vec<Persona> = Vec::new();
    for caps in MENTION_RE.captures_iter(text) {
        let Some(persona) = resolve_name(&caps[1], roster) else {
            continue;
        };
        if !found.iter().any(|p| p.name == persona.name) {
            found.push(persona.clone());
        }
    }
    found
}

/// Split a `Name: content` style prefix off model output
pub fn parse_attribution(text: &str, roster: &[Persona]) -> Attribution {
    if text.trim().is_empty() {
        return Attribution {
            persona_name: None,
            cleaned_text: text.to_string(),
        };
    }

    let trimmed = text.trim();
    for re in ATTRIBUTION_RES.iter() {
        let Some(caps) = re.captures(trimmed) else {
            continue;
        };
        let candidate = caps[1].replace("**", "");
        if let Some(persona) = resolve_name(candidate.trim(), roster) {
            return Attribution {
                persona_name: Some(persona.name.clone()),
                cleaned_text: caps[2].trim().to_string(),
            };
        }
    }

    Attribution {
        persona_name: None,
        cleaned_text: trimmed.to_string(),
    }
}

/// Pull the first `#direction` tag out of `text`
///
/// Returns the direction and the text with that tag removed. Tags naming
/// an unknown direction are left in place.
pub fn extract_direction_tag(text: &str) -> (Option<&'static str>, String) {
    for (idx, _) in text.match_indices('#') {
        let rest = &text[idx + 1..];
        let Some(direction) = DIRECTIONS.iter().copied().find(|d| rest.starts_with(d)) else {
            continue;
        };
        let before = text[..idx].trim_end();
        let after = &rest[direction.len()..];
        let cleaned = format!("{}{}", before, after).trim().to_string();
        return (Some(direction), cleaned);
    }
    (None, text.to_string())
}
