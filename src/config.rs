//! Configuration system for persona-chat
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (PERSONA_CHAT_* prefix, plus OPENROUTER_API_KEY)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chat::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::error::{Error, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Completion provider connection settings
    pub provider: ProviderSettings,

    /// Conversation orchestration settings
    pub chat: ChatSettings,

    /// Logging configuration
    pub logging: LoggingSettings,

    /// Data storage paths
    pub storage: StorageSettings,
}

/// OpenAI-compatible completion provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// API base URL (OpenRouter by default)
    pub base_url: String,

    /// API key (empty = not configured)
    pub api_key: String,

    /// Model used for persona replies
    pub chat_model: String,

    /// Model used for summaries and titles
    pub summary_model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Conversation orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Sampling temperature for persona replies
    pub chat_temperature: f32,

    /// Messages longer than this (in characters) get a background summary
    pub summary_threshold_chars: usize,

    /// Context window assigned to new conversations (1-50)
    pub default_context_window: u32,

    /// Minimum real messages before a title is generated
    pub title_min_messages: usize,

    /// Number of leading messages fed to title generation
    pub title_source_messages: usize,

    /// Maximum wait for a single stream fragment, in milliseconds
    pub chunk_timeout_ms: u64,

    /// Deadline for the non-streaming fallback, in seconds
    pub fallback_timeout_secs: u64,

    /// Stream setup retries after the first attempt
    pub max_retries: u32,

    /// Base retry delay in milliseconds (multiplied by the attempt number)
    pub retry_delay_ms: u64,

    /// Optional file holding a custom base prompt template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template_file: Option<String>,

    /// Treat a single @mention as a fan-out of one instead of a directive
    pub fan_out_single_mention: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

/// Storage path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding the persisted conversation store
    pub data_dir: String,
}

// Default implementations

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            chat_model: "qwen/qwen3-30b-a3b".to_string(),
            summary_model: "qwen/qwen3-8b".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            chat_temperature: 0.7,
            summary_threshold_chars: 100,
            default_context_window: 10,
            title_min_messages: 3,
            title_source_messages: 4,
            chunk_timeout_ms: 10_000,
            fallback_timeout_secs: 60,
            max_retries: 2,
            retry_delay_ms: 1000,
            prompt_template_file: None,
            fan_out_single_mention: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|p| p.join("persona-chat").to_string_lossy().into_owned())
            .unwrap_or_else(|| "~/.persona-chat/data".to_string());
        Self { data_dir }
    }
}

impl ChatSettings {
    /// Per-fragment timeout as a Duration
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    /// Fallback deadline as a Duration
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_timeout_secs)
    }

    /// Base retry delay as a Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::config_parse(format!("{}: {}", path.display(), e.message()), Some(e))
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("persona-chat.toml"),
            PathBuf::from("config.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("persona-chat").join("config.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".persona-chat").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Provider settings
        if let Ok(val) = std::env::var("OPENROUTER_API_KEY") {
            self.provider.api_key = val;
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_API_KEY") {
            self.provider.api_key = val;
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_BASE_URL") {
            self.provider.base_url = val;
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_CHAT_MODEL") {
            self.provider.chat_model = val;
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_SUMMARY_MODEL") {
            self.provider.summary_model = val;
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.provider.timeout_secs = n;
            }
        }

        // Chat settings
        if let Ok(val) = std::env::var("PERSONA_CHAT_CONTEXT_WINDOW") {
            if let Ok(n) = val.parse() {
                self.chat.default_context_window = n;
            }
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_SUMMARY_THRESHOLD") {
            if let Ok(n) = val.parse() {
                self.chat.summary_threshold_chars = n;
            }
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_CHUNK_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.chat.chunk_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                self.chat.max_retries = n;
            }
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_PROMPT_TEMPLATE") {
            self.chat.prompt_template_file = Some(val);
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_FAN_OUT_SINGLE_MENTION") {
            self.chat.fan_out_single_mention = val.to_lowercase() == "true" || val == "1";
        }

        // Logging settings
        if let Ok(val) = std::env::var("PERSONA_CHAT_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("PERSONA_CHAT_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }

        // Storage settings
        if let Ok(val) = std::env::var("PERSONA_CHAT_DATA_DIR") {
            self.storage.data_dir = val;
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.storage.data_dir = expand_path(&self.storage.data_dir);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
        if let Some(ref file) = self.chat.prompt_template_file {
            self.chat.prompt_template_file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = &self.provider.base_url;
        if url.is_empty() {
            return Err(Error::config_field_invalid(
                "provider.base_url",
                "Provider base URL cannot be empty",
            ));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::config_field_invalid(
                "provider.base_url",
                "Provider base URL must start with http:// or https://",
            ));
        }

        if self.provider.chat_model.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "provider.chat_model",
                "Chat model cannot be empty",
            ));
        }
        if self.provider.summary_model.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "provider.summary_model",
                "Summary model cannot be empty",
            ));
        }
        if self.provider.timeout_secs == 0 {
            return Err(Error::config_field_invalid(
                "provider.timeout_secs",
                "timeout_secs must be greater than 0",
            ));
        }

        if !(1..=50).contains(&self.chat.default_context_window) {
            return Err(Error::config_field_invalid(
                "chat.default_context_window",
                "default_context_window must be between 1 and 50",
            ));
        }
        if self.chat.chunk_timeout_ms == 0 || self.chat.fallback_timeout_secs == 0 {
            return Err(Error::config_field_invalid(
                "chat.chunk_timeout_ms",
                "Stream timeouts must be greater than 0",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Get the data directory as a PathBuf
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    /// Base prompt template: the configured file, or the built-in default
    pub fn system_prompt(&self) -> Result<String> {
        match &self.chat.prompt_template_file {
            Some(file) => {
                let path = PathBuf::from(file);
                fs::read_to_string(&path).map_err(|e| Error::IoRead { path, source: e })
            }
            None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    /// Render the effective configuration as TOML with the API key masked
    pub fn to_masked_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.provider.api_key = mask_secret(&shown.provider.api_key);
        Ok(toml::to_string_pretty(&shown)?)
    }
}

/// Mask all but the last four characters of a secret
fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count == 0 {
        return String::new();
    }
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location used by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("persona-chat")
        .join("config.toml")
}

/// Initialize a new configuration file, returning where it was written
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# persona-chat configuration

[provider]
# OpenAI-compatible API base URL
base_url = "https://openrouter.ai/api/v1"

# API key (or export OPENROUTER_API_KEY)
api_key = ""

# Model used for persona replies
chat_model = "qwen/qwen3-30b-a3b"

# Model used for summaries and titles
summary_model = "qwen/qwen3-8b"

# Request timeout in seconds
timeout_secs = 120

[chat]
# Sampling temperature for persona replies
chat_temperature = 0.7

# Messages longer than this many characters get a background summary
summary_threshold_chars = 100

# Recent messages kept verbatim in prompts for new conversations (1-50)
default_context_window = 10

# Generate a title once a conversation has this many messages
title_min_messages = 3

# Leading messages used to generate the title
title_source_messages = 4

# Maximum wait for a single stream fragment (milliseconds)
chunk_timeout_ms = 10000

# Deadline for the non-streaming fallback (seconds)
fallback_timeout_secs = 60

# Stream setup retries and base delay (milliseconds, grows linearly)
max_retries = 2
retry_delay_ms = 1000

# Custom base prompt template file
# prompt_template_file = "~/.persona-chat/prompt.md"

# Reply with a one-persona fan-out when exactly one persona is @mentioned
fan_out_single_mention = false

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.persona-chat/logs/persona-chat.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false

[storage]
# Directory holding conversations and personas
data_dir = "~/.persona-chat/data"
"#
    .to_string()
}
