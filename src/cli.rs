//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for persona-chat.

use clap::{Parser, Subcommand};

/// Persona Chat - multi-persona AI group chat in the terminal
///
/// Talk to several AI personas at once. Mention them with @name, steer the
/// conversation with #direction, and let long histories be summarized
/// automatically.
#[derive(Parser, Debug)]
#[command(name = "persona-chat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, env = "PERSONA_CHAT_CONFIG", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat in the active conversation
    Chat,

    /// Send one message and print the replies
    Send {
        /// Message text; may contain @name mentions and a #direction tag
        text: Option<String>,

        /// Ask a persona (or "ai" to let the model choose) to continue
        #[arg(long, value_name = "NAME|ai")]
        next: Option<String>,
    },

    /// Conversation management
    Conversation {
        #[command(subcommand)]
        subcommand: ConversationSubcommand,
    },

    /// Persona roster management
    Persona {
        #[command(subcommand)]
        subcommand: PersonaSubcommand,
    },

    /// Export all conversations as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Replace all conversations with a JSON export
    Import {
        /// Path to the export file
        file: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Display version and build information
    Version,
}

/// Conversation subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConversationSubcommand {
    /// List conversations, pinned first
    List,

    /// Create a conversation and make it active
    New,

    /// Make a conversation active
    Switch {
        /// Conversation id (a unique prefix is enough)
        id: String,
    },

    /// Delete a conversation
    Delete {
        /// Conversation id (a unique prefix is enough)
        id: String,
    },

    /// Rename a conversation
    Rename {
        /// Conversation id (a unique prefix is enough)
        id: String,
        /// New title
        title: String,
    },

    /// Pin a conversation to the top of the list
    Pin {
        /// Conversation id (a unique prefix is enough)
        id: String,
    },

    /// Unpin a conversation
    Unpin {
        /// Conversation id (a unique prefix is enough)
        id: String,
    },

    /// Show the messages of a conversation
    Show {
        /// Conversation id; the active conversation when omitted
        id: Option<String>,
    },

    /// Show or change the active conversation's settings
    Settings {
        /// Comma-separated persona names that take part
        #[arg(long, value_delimiter = ',')]
        personas: Option<Vec<String>>,

        /// Conversation direction (默认, 深入讲讲, 换个视角, ...)
        #[arg(long)]
        direction: Option<String>,

        /// Number of recent messages sent verbatim (1-50)
        #[arg(long)]
        context_window: Option<u32>,

        /// Stored thinking-mode preference
        #[arg(long)]
        thinking: Option<bool>,
    },

    /// Delete every conversation
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

/// Persona subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum PersonaSubcommand {
    /// List the persona roster
    List,

    /// Add a persona
    Add {
        /// Display name, unique within the roster
        #[arg(long)]
        name: String,

        /// Profile describing the persona's voice and expertise
        #[arg(long)]
        prompt: String,

        /// Avatar icon (emoji)
        #[arg(long)]
        icon: Option<String>,

        /// Avatar background color
        #[arg(long)]
        bg_color: Option<String>,

        /// Avatar text color
        #[arg(long)]
        color: Option<String>,
    },

    /// Edit an existing persona; omitted fields keep their value
    Update {
        /// Persona name or id
        persona: String,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New profile text
        #[arg(long)]
        prompt: Option<String>,

        /// Avatar icon (emoji)
        #[arg(long)]
        icon: Option<String>,

        /// Avatar background color
        #[arg(long)]
        bg_color: Option<String>,

        /// Avatar text color
        #[arg(long)]
        color: Option<String>,
    },

    /// Remove a persona by name or id
    Remove {
        /// Persona name or id
        persona: String,
    },

    /// Restore the default roster
    Reset,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration (API key masked)
    Show,

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration
    Validate,
}
