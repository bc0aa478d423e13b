//! Error types for persona-chat
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - Classification used by the stream adapter (retry / fallback)
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for persona-chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,
    MissingCredential = 103,

    // IO / storage errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoNotFound = 203,
    StorageCorrupted = 204,
    InvalidImport = 205,

    // Provider transport errors (3xx)
    TransportFailed = 300,
    StreamTimeout = 301,
    Timeout = 302,
    ServiceUnavailable = 303,

    // Provider protocol errors (4xx)
    StreamDecode = 400,
    ProviderRejected = 401,
    AuthenticationFailed = 403,

    // Conversation errors (5xx)
    NoActiveConversation = 500,
    ConversationNotFound = 501,
    EmptyMessage = 502,
    TurnInFlight = 503,
    NoActivePersona = 504,
    InvalidDirection = 505,
    PersonaNotFound = 510,
    DuplicatePersona = 511,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No API key configured for the completion provider
    #[error("API key is not set for provider '{provider}'. Configure it in the settings.")]
    MissingCredential { provider: String },

    // ─────────────────────────────────────────────────────────────
    // IO / Storage Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// Stored value could not be decoded
    #[error("Stored data under '{key}' is corrupted: {message}")]
    StorageCorrupted { key: String, message: String },

    /// Import payload rejected before anything was replaced
    #[error("Invalid import data: {0}")]
    InvalidImport(String),

    // ─────────────────────────────────────────────────────────────
    // Provider Transport Errors
    // ─────────────────────────────────────────────────────────────

    /// Network-level failure talking to the provider
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// No fragment arrived within the per-fragment timeout
    #[error("No stream data received within {timeout_ms}ms")]
    StreamTimeout { timeout_ms: u64 },

    /// A whole operation exceeded its deadline
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout { operation: String, timeout_secs: u64 },

    /// Streaming and the non-streaming fallback both failed
    #[error("AI service is temporarily unavailable, please try again later")]
    ServiceUnavailable {
        #[source]
        source: Option<Box<Error>>,
    },

    // ─────────────────────────────────────────────────────────────
    // Provider Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Stream payload failed validation or transformation
    #[error("Failed to decode stream payload: {message}")]
    StreamDecode { message: String },

    /// Provider refused the request (non-retryable status)
    #[error("Provider rejected the request ({status}): {message}")]
    ProviderRejected { status: u16, message: String },

    /// Credential was rejected by the provider
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ─────────────────────────────────────────────────────────────
    // Conversation Errors
    // ─────────────────────────────────────────────────────────────

    /// No conversation is currently active
    #[error("No active conversation")]
    NoActiveConversation,

    /// Conversation id does not exist
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Neither message text nor a directive was supplied
    #[error("Message is empty and no next speaker was requested")]
    EmptyMessage,

    /// Another send is still running for this conversation
    #[error("A reply is already being generated for conversation {0}")]
    TurnInFlight(String),

    /// The conversation has no active personas
    #[error("No active personas in this conversation. Select at least one in the settings.")]
    NoActivePersona,

    /// Direction is not one of the fixed set
    #[error("Unknown conversation direction: {0}")]
    InvalidDirection(String),

    /// Persona lookup failed
    #[error("Persona not found: {0}")]
    PersonaNotFound(String),

    /// Persona name already used in the roster
    #[error("A persona named '{0}' already exists")]
    DuplicatePersona(String),

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,
            Error::MissingCredential { .. } => ErrorCode::MissingCredential,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::StorageCorrupted { .. } => ErrorCode::StorageCorrupted,
            Error::InvalidImport(_) => ErrorCode::InvalidImport,

            Error::Transport { .. } => ErrorCode::TransportFailed,
            Error::StreamTimeout { .. } => ErrorCode::StreamTimeout,
            Error::Timeout { .. } => ErrorCode::Timeout,
            Error::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,

            Error::StreamDecode { .. } => ErrorCode::StreamDecode,
            Error::ProviderRejected { .. } => ErrorCode::ProviderRejected,
            Error::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,

            Error::NoActiveConversation => ErrorCode::NoActiveConversation,
            Error::ConversationNotFound(_) => ErrorCode::ConversationNotFound,
            Error::EmptyMessage => ErrorCode::EmptyMessage,
            Error::TurnInFlight(_) => ErrorCode::TurnInFlight,
            Error::NoActivePersona => ErrorCode::NoActivePersona,
            Error::InvalidDirection(_) => ErrorCode::InvalidDirection,
            Error::PersonaNotFound(_) => ErrorCode::PersonaNotFound,
            Error::DuplicatePersona(_) => ErrorCode::DuplicatePersona,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Missing or rejected credentials: never retried, never fall back
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingCredential { .. } | Error::AuthenticationFailed { .. }
        )
    }

    /// Transient transport failures that justify a non-streaming fallback
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. }
                | Error::StreamDecode { .. }
                | Error::StreamTimeout { .. }
                | Error::Timeout { .. }
        )
    }

    /// Whether stream setup should be attempted again
    pub fn is_retryable(&self) -> bool {
        !self.is_configuration()
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'persona-chat config init' to create a default configuration file.",
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'persona-chat config validate' to see details.",
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values.",
            ),
            Error::MissingCredential { .. } => Some(
                "Set 'api_key' under [provider] or export OPENROUTER_API_KEY.",
            ),
            Error::AuthenticationFailed { .. } => Some(
                "Verify that your API key is valid and has access to the configured models.",
            ),
            Error::Transport { .. } | Error::ServiceUnavailable { .. } => Some(
                "Check your network connection and the provider base URL, then retry.",
            ),
            Error::StorageCorrupted { .. } => Some(
                "Export what you can with 'persona-chat export' and remove the corrupted file from the data directory.",
            ),
            Error::InvalidImport(_) => Some(
                "The import file must be a JSON export with a 'conversations' array.",
            ),
            Error::NoActivePersona => Some(
                "Enable a persona with 'persona-chat conversation settings --personas <names>'.",
            ),
            Error::InvalidDirection(_) => Some(
                "Valid directions: 默认, 深入讲讲, 换个视角, 通俗解释, 扩展知识, 批判思考, 进行辩论.",
            ),
            Error::NoActiveConversation => Some(
                "Create one with 'persona-chat conversation new'.",
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code().as_str(), self);

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>, source: Option<toml::de::Error>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// Create a stream decode error
    pub fn stream_decode(message: impl Into<String>) -> Self {
        Error::StreamDecode {
            message: message.into(),
        }
    }

    /// Create an operation timeout error
    pub fn timeout(operation: impl Into<String>, timeout_secs: u64) -> Self {
        Error::Timeout {
            operation: operation.into(),
            timeout_secs,
        }
    }

    /// Wrap the error that made a fallback fail
    pub fn service_unavailable(source: Error) -> Self {
        Error::ServiceUnavailable {
            source: Some(Box::new(source)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
