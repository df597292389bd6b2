//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - chat: interactive conversation loop
//! - source: add / use / show / delete model sources
//! - character: add / use / show / delete personas
//! - memory: on / off / show / clear for the active character

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use tera_sdk::errors::{EngineError, TeraErrorExt};
use tera_sdk::types::{CodeBlock, Message, Role};

use crate::agent::{
    load_session, save_session, AutoApprove, ConversationDriver, ExecutionApprover,
    MemoryServices, Session, SessionHandle, TurnOutcome, TurnStop,
};
use crate::cancel::cancel_pair;
use crate::cli::{CharacterAction, MemoryAction, SourceAction};
use crate::config::{CharacterConfig, Config, EmbeddingKind};
use crate::db::Database;
use crate::llm::{build_provider, RetryingClient};
use crate::memory::{
    Embedder, HashingEmbedder, MemoryError, ModelSummarizer, OpenAIEmbedder, VectorMemory,
    VectorStore,
};
use crate::sandbox::Sandbox;
use crate::secrets;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Flags of `tera chat`
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    pub new: bool,
    pub no_memory: bool,
}

/// Stdin shared by the chat loop and the execution prompt
type SharedInput = Arc<Mutex<Lines<BufReader<Stdin>>>>;

/// Asks on the terminal before each block runs
struct TerminalApprover {
    input: SharedInput,
}

#[async_trait]
impl ExecutionApprover for TerminalApprover {
    async fn approve(&self, block: &CodeBlock) -> bool {
        println!(
            "\n--- block {} ({}) ---\n{}\n---",
            block.index + 1,
            block.language.as_deref().unwrap_or("text"),
            block.source.trim_end()
        );
        print!("Run this block? [y/N] ");
        std::io::stdout().flush().ok();

        let mut input = self.input.lock().await;
        match input.next_line().await {
            Ok(Some(answer)) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.memory.embedding {
        EmbeddingKind::Hashing => Ok(Arc::new(HashingEmbedder::new(config.memory.dimension))),
        EmbeddingKind::OpenAI => {
            let source = config
                .active_source()
                .context("The openai embedding needs an active source")?;
            Ok(Arc::new(OpenAIEmbedder::new(
                source.base_url.clone(),
                config.memory.embedding_model.clone(),
                source.resolved_api_key(),
                config.memory.dimension,
            )))
        }
    }
}

async fn open_store(
    config: &Config,
    database: &Database,
    scope: &str,
) -> Result<VectorStore, MemoryError> {
    VectorStore::open(
        scope,
        config.memory.dimension,
        config.memory.metric,
        config.memory.capacity,
        database.memory(),
    )
    .await
}

/// Open the character's memory store for a chat session
///
/// Returns `None` when the session has memory turned off. A scope that
/// cannot be loaded suspends memory for the session and leaves the stored
/// records alone.
pub async fn open_chat_memory(
    config: &Config,
    database: &Database,
    session: &mut Session,
) -> Result<Option<VectorStore>, EngineError> {
    if !session.memory_enabled {
        return Ok(None);
    }
    match open_store(config, database, &session.scope).await {
        Ok(store) => Ok(Some(store)),
        Err(e) => {
            session.memory_suspended = true;
            Err(e.into())
        }
    }
}

/// Run the interactive conversation loop
pub async fn handle_chat(config: &Config, options: ChatOptions) -> Result<()> {
    let source = config.active_source()?;
    let character = config.active_character();
    let client = Arc::new(RetryingClient::new(
        build_provider(source),
        config.retry_policy(),
    ));
    if !client.check_health().await {
        tracing::warn!(
            "Source '{}' ({}) did not pass its health check",
            source.name,
            client.provider_name()
        );
        eprintln!(
            "Warning: source '{}' at {} looks unreachable or has no API key.",
            source.name, source.base_url
        );
    }

    let database = open_database(config).await?;
    let repo = database.sessions();

    let mut session = if options.new {
        repo.delete(&character.name)
            .await
            .context("Failed to discard the stored session")?;
        Session::new(
            character.name.as_str(),
            character.system_prompt(),
            config.memory.enabled,
        )
    } else {
        match load_session(
            &repo,
            &character.name,
            &character.system_prompt(),
            config.memory.enabled,
        )
        .await
        {
            Ok(session) => session,
            Err(e @ EngineError::InvalidTranscript(_)) => {
                bail!(
                    "{} ({}). Start over with `tera chat --new`.",
                    e.user_hint(),
                    e
                )
            }
            Err(e) => return Err(e).context("Failed to load session"),
        }
    };
    if options.no_memory {
        session.memory_enabled = false;
    }

    let input: SharedInput = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let sandbox = Arc::new(Sandbox::new(config.sandbox_policy()));

    let mut driver = ConversationDriver::new(Arc::clone(&client), sandbox, config.driver_settings());
    driver = if config.sandbox.confirm {
        driver.with_approver(Arc::new(TerminalApprover {
            input: Arc::clone(&input),
        }))
    } else {
        driver.with_approver(Arc::new(AutoApprove))
    };

    let api_key = source.resolved_api_key().unwrap_or_default();
    let known_secrets = [api_key.as_str()];

    // Only a store that loaded cleanly is wired in and persisted at exit
    let mut store = None;
    match open_chat_memory(config, &database, &mut session).await {
        Ok(Some(opened)) => {
            let opened = Arc::new(opened);
            driver = driver.with_memory(MemoryServices {
                store: Arc::clone(&opened) as Arc<dyn VectorMemory>,
                embedder: build_embedder(config)?,
                summarizer: Arc::new(ModelSummarizer::new(Arc::clone(&client))),
            });
            store = Some(opened);
        }
        Ok(None) => {}
        Err(e) => print_error(&e, &known_secrets),
    }

    println!(
        "Chatting as {} via {} ({}). Memory {}. Type 'exit' to quit, Ctrl-C to interrupt.",
        character.name,
        source.name,
        source.model,
        match (session.memory_enabled, session.memory_suspended) {
            (false, _) => "off",
            (true, true) => "suspended",
            (true, false) => "on",
        }
    );
    let handle = SessionHandle::new(session);
    save_current(&repo, &handle).await;

    if config.chat.greeting {
        let (_cancel, token) = cancel_pair();
        let before = next_ordinal(&handle).await;
        match driver.greet(&handle, &token).await {
            Ok(outcome) => print_turn(&handle, &character, before, &outcome).await,
            Err(e) => print_error(&e, &known_secrets),
        }
        save_current(&repo, &handle).await;
    }

    loop {
        print!("\nYou> ");
        std::io::stdout().flush().ok();

        let line = {
            let mut reader = input.lock().await;
            tokio::select! {
                line = reader.next_line() => line.context("Failed to read input")?,
                _ = tokio::signal::ctrl_c() => None,
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }

        let (cancel, token) = cancel_pair();
        let before = next_ordinal(&handle).await;
        let turn = driver.handle_turn(&handle, text, &token);
        tokio::pin!(turn);
        let result = loop {
            tokio::select! {
                result = &mut turn => break result,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("\nInterrupting...");
                    cancel.cancel();
                }
            }
        };

        match result {
            Ok(outcome) => {
                print_turn(&handle, &character, before, &outcome).await;
                save_current(&repo, &handle).await;
            }
            Err(e) if e.is_recoverable() => print_error(&e, &known_secrets),
            Err(e) => {
                print_error(&e, &known_secrets);
                break;
            }
        }
    }

    save_current(&repo, &handle).await;
    if let Some(store) = store {
        if let Err(e) = store.persist().await {
            tracing::warn!("Failed to persist memory on exit: {}", e);
        }
    }
    database.close().await.context("Failed to close database")?;
    println!("Bye.");
    Ok(())
}

async fn next_ordinal(handle: &SessionHandle) -> u64 {
    handle.lock().await.next_ordinal()
}

async fn save_current(repo: &crate::db::SessionRepository, handle: &SessionHandle) {
    let session = handle.lock().await;
    if let Err(e) = save_session(repo, &session).await {
        tracing::warn!("Failed to save session: {}", e);
        eprintln!("Warning: {}", e.user_hint());
    }
}

/// Print the assistant and tool messages produced since `from`
async fn print_turn(
    handle: &SessionHandle,
    character: &CharacterConfig,
    from: u64,
    outcome: &TurnOutcome,
) {
    let session = handle.lock().await;
    let new_messages: Vec<&Message> = session
        .transcript()
        .iter()
        .filter(|m| m.ordinal >= from && m.role != Role::User)
        .collect();
    for message in new_messages {
        match message.role {
            Role::Tool => println!("\n{}", message.content),
            _ => println!("\n{}> {}", character.name, message.content),
        }
    }
    if outcome.stop == TurnStop::LoopLimitReached {
        let limit = EngineError::LoopLimitExceeded(outcome.rounds);
        eprintln!("\nNote: {} ({})", limit.user_hint(), limit);
    }
}

fn print_error(e: &EngineError, known_secrets: &[&str]) {
    eprintln!("✗ {}", e.user_hint());
    eprintln!("  {}", secrets::scrub_known(&e.to_string(), known_secrets));
}

/// `tera source ...`
pub fn handle_source(
    action: SourceAction,
    config: &mut Config,
    config_path: &Path,
    format: OutputFormat,
) -> Result<()> {
    match action {
        SourceAction::Add {
            name,
            base_url,
            model,
            api_key,
            kind,
        } => {
            let added = config.add_source(&name, kind, &base_url, &model, api_key)?;
            println!("✓ Source '{}' saved ({} {})", added.name, added.kind, added.model);
            config.save(config_path)?;
        }
        SourceAction::Use { name } => {
            config.use_source(&name)?;
            config.save(config_path)?;
            println!("✓ Active source: {}", name);
        }
        SourceAction::Delete { name } => {
            config.remove_source(&name)?;
            config.save(config_path)?;
            println!("✓ Source '{}' deleted", name);
        }
        SourceAction::Show => {
            let active = config.llm.active_source.as_deref();
            match format {
                OutputFormat::Text => {
                    if config.llm.sources.is_empty() {
                        println!("No sources configured");
                        return Ok(());
                    }
                    for source in &config.llm.sources {
                        let marker = if Some(source.name.as_str()) == active { "*" } else { " " };
                        println!(
                            "{} {}  {}  {}  {}  key: {}",
                            marker,
                            source.name,
                            source.kind,
                            source.base_url,
                            source.model,
                            source.masked_api_key()
                        );
                    }
                }
                OutputFormat::Json => {
                    let sources: Vec<_> = config
                        .llm
                        .sources
                        .iter()
                        .map(|s| {
                            json!({
                                "name": s.name,
                                "kind": s.kind,
                                "base_url": s.base_url,
                                "model": s.model,
                                "api_key": s.masked_api_key(),
                                "active": Some(s.name.as_str()) == active,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&json!({ "sources": sources }))?);
                }
            }
        }
    }
    Ok(())
}

/// `tera character ...`
pub fn handle_character(
    action: CharacterAction,
    config: &mut Config,
    config_path: &Path,
    format: OutputFormat,
) -> Result<()> {
    match action {
        CharacterAction::Add { name, setting } => {
            config.add_character(&name, &setting)?;
            config.save(config_path)?;
            println!("✓ Character '{}' saved", name);
        }
        CharacterAction::Use { name } => {
            config.use_character(&name)?;
            config.save(config_path)?;
            println!("✓ Active character: {}", name);
        }
        CharacterAction::Delete { name } => {
            config.remove_character(&name)?;
            config.save(config_path)?;
            println!("✓ Character '{}' deleted", name);
        }
        CharacterAction::Show { name: Some(name) } => {
            let character = config
                .character(&name)
                .with_context(|| format!("Character '{}' not found", name))?;
            match format {
                OutputFormat::Text => {
                    println!("{}", character.name);
                    println!("{}", character.setting);
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(character)?),
            }
        }
        CharacterAction::Show { name: None } => match format {
            OutputFormat::Text => {
                for character in &config.characters.entries {
                    let marker = if character.name == config.characters.active { "*" } else { " " };
                    println!("{} {} -> {}", marker, character.name, character.preview());
                }
            }
            OutputFormat::Json => {
                let output = json!({
                    "active": config.characters.active,
                    "characters": config.characters.entries,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        },
    }
    Ok(())
}

/// `tera memory ...` for the active character
pub async fn handle_memory(action: MemoryAction, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let scope = config.active_character().name;

    match action {
        MemoryAction::On | MemoryAction::Off => {
            let enabled = matches!(action, MemoryAction::On);
            let repo = database.sessions();
            let messages = repo
                .load(&scope)
                .await
                .context("Failed to load session")?
                .map(|stored| stored.messages)
                .unwrap_or_default();
            repo.save(&scope, enabled, &messages)
                .await
                .context("Failed to save session")?;
            println!(
                "✓ Memory {} for '{}'",
                if enabled { "enabled" } else { "disabled" },
                scope
            );
        }
        MemoryAction::Show => {
            let store = open_store(config, &database, &scope)
                .await
                .map_err(EngineError::from)
                .with_context(|| {
                    format!(
                        "Memory for '{}' cannot be read. Restore the previous memory settings or run `tera memory clear`",
                        scope
                    )
                })?;
            let records = store.records().await;
            match format {
                OutputFormat::Text => {
                    if records.is_empty() {
                        println!("No memories for '{}'", scope);
                    }
                    for record in &records {
                        println!(
                            "#{} [{}] {}",
                            record.id,
                            record.created_at.format("%Y-%m-%d %H:%M"),
                            record.text
                        );
                    }
                }
                OutputFormat::Json => {
                    let items: Vec<_> = records
                        .iter()
                        .map(|r| json!({ "id": r.id, "text": r.text, "created_at": r.created_at }))
                        .collect();
                    let output = json!({ "scope": scope, "count": items.len(), "memories": items });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
        }
        MemoryAction::Clear => {
            database
                .memory()
                .delete_scope(&scope)
                .await
                .context("Failed to clear memory")?;
            println!("✓ Memory cleared for '{}'", scope);
        }
    }

    database.close().await.context("Failed to close database")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (Config, Database) {
        let mut config = Config::default_config();
        config.core.data_dir = dir.path().to_path_buf();
        config.memory.enabled = true;
        config.memory.dimension = 3;
        let database = open_database(&config).await.unwrap();
        (config, database)
    }

    #[tokio::test]
    async fn test_chat_memory_off_opens_nothing() {
        let dir = TempDir::new().unwrap();
        let (config, database) = setup(&dir).await;
        let mut session = Session::new("mochi", "", false);

        let store = open_chat_memory(&config, &database, &mut session).await.unwrap();
        assert!(store.is_none());
        assert!(!session.memory_suspended);
    }

    #[tokio::test]
    async fn test_unreadable_memory_suspends_session_and_survives() {
        let dir = TempDir::new().unwrap();
        let (mut config, database) = setup(&dir).await;

        let mut session = Session::new("mochi", "", true);
        let store = open_chat_memory(&config, &database, &mut session)
            .await
            .unwrap()
            .unwrap();
        store
            .insert("likes tea".to_string(), vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        store.persist().await.unwrap();

        // The embedding settings changed between runs
        config.memory.dimension = 4;
        let mut session = Session::new("mochi", "", true);
        let err = open_chat_memory(&config, &database, &mut session)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Memory(_)));
        assert!(session.memory_suspended);
        assert!(!session.memory_active());

        config.memory.dimension = 3;
        let mut session = Session::new("mochi", "", true);
        let store = open_chat_memory(&config, &database, &mut session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.records().await[0].text, "likes tea");
        assert!(session.memory_active());

        database.close().await.unwrap();
    }
}
