//! Persona profiles and avatars

use serde::{Deserialize, Serialize};

/// Visual identity shown next to a speaker's messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarConfig {
    /// Emoji or short glyph
    pub icon: String,
    /// Background color (CSS hex)
    pub bg_color: String,
    /// Foreground color (CSS hex)
    pub color: String,
}

impl AvatarConfig {
    pub fn new(icon: impl Into<String>, bg_color: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            icon: icon.into(),
            bg_color: bg_color.into(),
            color: color.into(),
        }
    }

    /// Avatar given to new personas that do not pick one
    pub fn default_persona() -> Self {
        Self::new("😀", "#fce7f3", "#831843")
    }

    /// Avatar for replies that could not be attributed to a persona
    pub fn unattributed() -> Self {
        Self::new("⏳", "#f1f5f9", "#475569")
    }

    /// Avatar for system notices
    pub fn system() -> Self {
        Self::new("⚙️", "#fee2e2", "#991b1b")
    }
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self::default_persona()
    }
}

/// A named character profile the model is asked to play
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    /// Unique within the roster
    pub name: String,
    #[serde(default)]
    pub avatar: AvatarConfig,
    /// Free-text profile injected into the prompt
    pub prompt: String,
}

impl Persona {
    /// Create a persona with a fresh id
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, avatar: Option<AvatarConfig>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            avatar: avatar.unwrap_or_default(),
            prompt: prompt.into(),
        }
    }

    /// Name with all whitespace removed, used for fuzzy matching
    pub fn compact_name(&self) -> String {
        strip_whitespace(&self.name)
    }
}

pub(crate) fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// The roster every fresh installation starts with
pub fn default_personas() -> Vec<Persona> {
    vec![
        Persona {
            id: "1".to_string(),
            name: "贾行家".to_string(),
            avatar: AvatarConfig::new("✍️", "#e0e7ff", "#3730a3"),
            prompt: "你是一位学识渊博、洞察深刻的作家贾行家。你的语言风格沉郁顿挫，富有文采和哲思。你善于从历史、文化和个人经验中引经据典，将复杂的事物用富有诗意和画面感的语言表达出来，常常带有淡淡的忧伤和对人世的深刻关怀。回答问题时，多从人文角度切入，层层递进，引人深思。".to_string(),
        },
        Persona {
            id: "2".to_string(),
            name: "万维钢".to_string(),
            avatar: AvatarConfig::new("💡", "#ffedd5", "#9a3412"),
            prompt: "你是一位精英思想家和科普作家万维钢。你的思维方式是理性的、科学的和精英化的。你善于引用最新的科学研究、物理学原理和经济学模型来解释世界。你的语言风格清晰、直接、逻辑性强，喜欢使用类比和数据说话，旨在为用户提供“精英水平”的见解，帮助他们升级自己的思维模式。".to_string(),
        },
        Persona {
            id: "3".to_string(),
            name: "吴军".to_string(),
            avatar: AvatarConfig::new("📈", "#dcfce7", "#166534"),
            prompt: "你是一位经验丰富的计算机科学家、投资人和教育家吴军。你看问题的视角宏大，注重方法论和长远眼光。你善于从科技发展、商业格局和历史规律中总结经验教训。你的语言风格温和而坚定，像一位导师，循循善诱，旨在为用户提供高层次的视野和切实可行的方法论，强调“局”和“势”的重要性。".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roster() {
        let roster = default_personas();
        let names: Vec<&str> = roster.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["贾行家", "万维钢", "吴军"]);
    }

    #[test]
    fn test_new_persona_gets_default_avatar() {
        let persona = Persona::new("Alice", "friendly", None);
        assert_eq!(persona.avatar, AvatarConfig::default_persona());
        assert!(!persona.id.is_empty());
    }

    #[test]
    fn test_compact_name() {
        let persona = Persona::new("Data Scientist", "", None);
        assert_eq!(persona.compact_name(), "DataScientist");
    }

    #[test]
    fn test_avatar_serializes_camel_case() {
        let json = serde_json::to_string(&AvatarConfig::system()).unwrap();
        assert!(json.contains("\"bgColor\""));
    }
}
