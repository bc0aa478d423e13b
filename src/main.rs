//! Persona Chat - multi-persona AI group chat
//!
//! This is the main entry point for the persona-chat binary.

mod cli;
mod render;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info};

use persona_chat::chat::{Directive, Engine, EngineEvent, SendRequest, TurnOutcome, Workspace};
use persona_chat::config::{self, AppConfig};
use persona_chat::error::{Error, Result};
use persona_chat::provider::{OpenAiConfig, OpenAiProvider};
use persona_chat::store::{ConversationDb, FileStore};
use persona_chat::types::{AvatarConfig, ConversationSettings, Sender, DIRECTIONS};
use persona_chat::{logging, version};

use crate::cli::{Cli, Commands, ConfigSubcommand, ConversationSubcommand, PersonaSubcommand};
use crate::render::{message_header, ReplyPrinter};

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    // Commands that don't need the workspace use simple setup
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(cli.config.as_deref(), subcommand.clone());
        }
        _ => {}
    }

    let config = AppConfig::load(cli.config.as_deref())?;

    // The guards must be kept alive for the lifetime of the program
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    debug!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting persona-chat"
    );

    let workspace = open_workspace(&config)?;

    match cli.command {
        Commands::Chat => run_async(run_chat(config, workspace)),
        Commands::Send { text, next } => run_async(run_send(config, workspace, text, next)),
        Commands::Conversation { subcommand } => handle_conversation_command(&workspace, subcommand),
        Commands::Persona { subcommand } => handle_persona_command(&workspace, subcommand),
        Commands::Export { output } => handle_export(&workspace, output),
        Commands::Import { file } => handle_import(&workspace, &file),
        Commands::Version | Commands::Config { .. } => {
            // Already handled above
            unreachable!();
        }
    }
}

/// Open the file-backed workspace under the configured data directory
fn open_workspace(config: &AppConfig) -> Result<Arc<Workspace>> {
    let data_dir = config.data_dir();
    let store = FileStore::open(&data_dir)?;
    info!(data_dir = %data_dir.display(), "Data directory opened");
    let db = ConversationDb::new(Arc::new(store));
    Ok(Arc::new(Workspace::open(db, config.chat.default_context_window)?))
}

fn build_engine(config: &AppConfig, workspace: Arc<Workspace>) -> Result<Engine> {
    let provider = OpenAiProvider::new(OpenAiConfig::from(&config.provider))?;
    Engine::from_config(workspace, Arc::new(provider), config)
}

fn run_async<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("persona-chat")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(future)
}

// ─────────────────────────────────────────────────────────────────
// Chat
// ─────────────────────────────────────────────────────────────────

/// Parse a `--next` / `/next` argument into a directive
fn parse_next(workspace: &Workspace, value: &str) -> Result<Directive> {
    let value = value.trim().trim_start_matches('@');
    if value.is_empty() || value.eq_ignore_ascii_case("ai") {
        return Ok(Directive::LetAiChoose);
    }
    let roster = workspace.personas();
    persona_chat::chat::resolve_name(value, &roster)
        .map(|p| Directive::Persona(p.name.clone()))
        .ok_or_else(|| Error::PersonaNotFound(value.to_string()))
}

async fn run_send(
    config: AppConfig,
    workspace: Arc<Workspace>,
    text: Option<String>,
    next: Option<String>,
) -> Result<()> {
    let engine = build_engine(&config, workspace.clone())?;
    let directive = next.as_deref().map(|n| parse_next(&workspace, n)).transpose()?;

    let mut events = engine.subscribe();
    let outcome = drive_turn(
        &engine,
        SendRequest {
            user_text: text,
            directive,
        },
        &mut events,
    )
    .await?;

    engine.wait_background().await;
    debug!(replies = outcome.replies.len(), "Send finished");
    Ok(())
}

async fn run_chat(config: AppConfig, workspace: Arc<Workspace>) -> Result<()> {
    let engine = build_engine(&config, workspace.clone())?;
    let mut events = engine.subscribe();

    if let Some(convo) = workspace.active_conversation() {
        println!("{} ({} messages, direction: {})", convo.title, convo.real_message_count(), convo.direction);
    }
    println!("Type a message, @name to address a persona, #direction to steer, /next [name|ai], /quit to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest)) {
            ("/quit", _) | ("/exit", _) => break,
            ("/help", _) => {
                println!("Directions: {}", DIRECTIONS.join(", "));
                println!("/next [name|ai]  ask someone to continue");
                println!("/quit            leave the chat");
                continue;
            }
            ("/next", arg) => match parse_next(&workspace, arg) {
                Ok(directive) => SendRequest::next(directive),
                Err(e) => {
                    eprint!("{}", e.format_for_terminal());
                    continue;
                }
            },
            _ => SendRequest::text(line),
        };

        if let Err(e) = drive_turn(&engine, request, &mut events).await {
            eprint!("{}", e.format_for_terminal());
        }
    }

    engine.wait_background().await;
    Ok(())
}

/// Run one turn while printing its events as they arrive
async fn drive_turn(
    engine: &Engine,
    request: SendRequest,
    events: &mut broadcast::Receiver<EngineEvent>,
) -> Result<TurnOutcome> {
    let turn = engine.send_message(request);
    tokio::pin!(turn);
    let mut printer = ReplyPrinter::new(std::io::stdout());
    let mut print = |event: &EngineEvent| {
        if let Err(e) = printer.handle(event) {
            debug!(error = %e, "Failed to write event");
        }
    };

    loop {
        tokio::select! {
            result = &mut turn => {
                while let Ok(event) = events.try_recv() {
                    print(&event);
                }
                return result;
            }
            event = events.recv() => match event {
                Ok(event) => print(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Conversations
// ─────────────────────────────────────────────────────────────────

/// Accept a full conversation id or a unique prefix of one
fn resolve_conversation_id(workspace: &Workspace, key: &str) -> Result<String> {
    let conversations = workspace.list_conversations();
    if conversations.iter().any(|c| c.id == key) {
        return Ok(key.to_string());
    }
    let mut matches = conversations.iter().filter(|c| c.id.starts_with(key));
    match (matches.next(), matches.next()) {
        (Some(convo), None) => Ok(convo.id.clone()),
        _ => Err(Error::ConversationNotFound(key.to_string())),
    }
}

fn active_id(workspace: &Workspace) -> Result<String> {
    workspace.active_conversation_id().ok_or(Error::NoActiveConversation)
}

fn handle_conversation_command(workspace: &Workspace, subcommand: ConversationSubcommand) -> Result<()> {
    match subcommand {
        ConversationSubcommand::List => {
            let active = workspace.active_conversation_id();
            for convo in workspace.list_conversations() {
                let marker = if active.as_deref() == Some(convo.id.as_str()) { "*" } else { " " };
                let pin = if convo.pinned { "📌 " } else { "" };
                let short_id: String = convo.id.chars().take(8).collect();
                println!(
                    "{} {}  {}{}  ({} messages)",
                    marker,
                    short_id,
                    pin,
                    convo.title,
                    convo.real_message_count()
                );
            }
        }
        ConversationSubcommand::New => {
            let convo = workspace.create_conversation()?;
            println!("Created conversation {}", convo.id);
        }
        ConversationSubcommand::Switch { id } => {
            let id = resolve_conversation_id(workspace, &id)?;
            workspace.switch_conversation(&id)?;
            println!("Switched to {}", id);
        }
        ConversationSubcommand::Delete { id } => {
            let id = resolve_conversation_id(workspace, &id)?;
            workspace.delete_conversation(&id)?;
            println!("Deleted {}", id);
        }
        ConversationSubcommand::Rename { id, title } => {
            let id = resolve_conversation_id(workspace, &id)?;
            workspace.rename_conversation(&id, &title)?;
        }
        ConversationSubcommand::Pin { id } => {
            let id = resolve_conversation_id(workspace, &id)?;
            workspace.set_pinned(&id, true)?;
        }
        ConversationSubcommand::Unpin { id } => {
            let id = resolve_conversation_id(workspace, &id)?;
            workspace.set_pinned(&id, false)?;
        }
        ConversationSubcommand::Show { id } => {
            let id = match id {
                Some(id) => resolve_conversation_id(workspace, &id)?,
                None => active_id(workspace)?,
            };
            let convo = workspace
                .conversation(&id)
                .ok_or_else(|| Error::ConversationNotFound(id.clone()))?;
            println!("# {}", convo.title);
            for message in convo.real_messages() {
                let header = match message.sender {
                    Sender::User => format!("{}: ", message.sender.label()),
                    _ => message_header(message),
                };
                println!("\n{}{}", header, message.text);
            }
        }
        ConversationSubcommand::Settings {
            personas,
            direction,
            context_window,
            thinking,
        } => {
            let id = active_id(workspace)?;
            let active_persona_ids = personas
                .map(|names| {
                    names
                        .iter()
                        .map(|name| {
                            workspace
                                .find_persona(name.trim())
                                .map(|p| p.id)
                                .ok_or_else(|| Error::PersonaNotFound(name.clone()))
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .transpose()?;

            workspace.update_settings(
                &id,
                ConversationSettings {
                    active_persona_ids,
                    direction,
                    thinking_mode: thinking,
                    context_window,
                },
            )?;

            let convo = workspace
                .conversation(&id)
                .ok_or_else(|| Error::ConversationNotFound(id.clone()))?;
            let names: Vec<String> = workspace.active_personas(&convo).into_iter().map(|p| p.name).collect();
            println!("Title:          {}", convo.title);
            println!("Personas:       {}", names.join(", "));
            println!("Direction:      {}", convo.direction);
            println!("Context window: {}", convo.context_window());
            println!("Thinking mode:  {}", convo.thinking_mode);
        }
        ConversationSubcommand::Clear { yes } => {
            if !yes && !confirm("Delete ALL conversations? This cannot be undone. [y/N] ")? {
                println!("Aborted.");
                return Ok(());
            }
            workspace.clear_all_conversations()?;
            println!("All conversations deleted.");
        }
    }

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

// ─────────────────────────────────────────────────────────────────
// Personas
// ─────────────────────────────────────────────────────────────────

fn handle_persona_command(workspace: &Workspace, subcommand: PersonaSubcommand) -> Result<()> {
    match subcommand {
        PersonaSubcommand::List => {
            for persona in workspace.personas() {
                let summary: String = persona.prompt.chars().take(40).collect();
                println!("{} {}  [{}]  {}", persona.avatar.icon, persona.name, persona.id, summary);
            }
        }
        PersonaSubcommand::Add {
            name,
            prompt,
            icon,
            bg_color,
            color,
        } => {
            let defaults = AvatarConfig::default_persona();
            let avatar = AvatarConfig::new(
                icon.unwrap_or(defaults.icon),
                bg_color.unwrap_or(defaults.bg_color),
                color.unwrap_or(defaults.color),
            );
            let persona = workspace.add_persona(&name, &prompt, Some(avatar))?;
            println!("Added persona {} ({})", persona.name, persona.id);
        }
        PersonaSubcommand::Update {
            persona,
            name,
            prompt,
            icon,
            bg_color,
            color,
        } => {
            let mut updated = workspace
                .find_persona(&persona)
                .ok_or_else(|| Error::PersonaNotFound(persona.clone()))?;
            if let Some(name) = name {
                updated.name = name;
            }
            if let Some(prompt) = prompt {
                updated.prompt = prompt.trim().to_string();
            }
            if let Some(icon) = icon {
                updated.avatar.icon = icon;
            }
            if let Some(bg_color) = bg_color {
                updated.avatar.bg_color = bg_color;
            }
            if let Some(color) = color {
                updated.avatar.color = color;
            }
            workspace.update_persona(updated.clone())?;
            println!("Updated persona {} ({})", updated.name.trim(), updated.id);
        }
        PersonaSubcommand::Remove { persona } => {
            let removed = workspace.remove_persona(&persona)?;
            println!("Removed persona {}", removed.name);
        }
        PersonaSubcommand::Reset => {
            workspace.reset_personas()?;
            println!("Persona roster restored to defaults.");
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Export / Import
// ─────────────────────────────────────────────────────────────────

fn handle_export(workspace: &Workspace, output: Option<String>) -> Result<()> {
    let json = workspace.export_data()?;
    match output {
        Some(path) => {
            let path = PathBuf::from(path);
            std::fs::write(&path, json).map_err(|e| Error::IoWrite {
                path: path.clone(),
                source: e,
            })?;
            println!("Exported to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn handle_import(workspace: &Workspace, file: &str) -> Result<()> {
    let path = PathBuf::from(file);
    let json = std::fs::read_to_string(&path).map_err(|e| Error::IoRead {
        path: path.clone(),
        source: e,
    })?;
    let summary = workspace.import_data(&json)?;
    println!("Imported {} conversations.", summary.conversations);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

fn handle_config_command(config_path: Option<&str>, subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show => {
            let cfg = AppConfig::load(config_path)?;
            println!("{}", cfg.to_masked_toml()?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate => {
            AppConfig::load(config_path)?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
